/// Commented starter config written by `sls config init`.
pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SLS CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/sls/config.yml
#   3. /etc/sls/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# -----------------------------------------------------------------------------
# SERVER
# -----------------------------------------------------------------------------
server:
  # Address and port to listen on
  listen: "0.0.0.0:7200"
  # How long in-flight requests may run after a shutdown signal
  shutdown_timeout: 5s
  # Largest accepted POST /log body
  max_body_bytes: 10485760

# -----------------------------------------------------------------------------
# STORAGE
# -----------------------------------------------------------------------------
# One file per UTC day, named YYYYMMDD.log. The directory must already exist
# and be writable.
storage:
  dir: /var/log/sls

# -----------------------------------------------------------------------------
# AUTH
# -----------------------------------------------------------------------------
# Shared secret sent by producers and tail clients in the X-API-Key header.
# Requests with a wrong or missing key are answered 404.
auth:
  api_key: $env{SLS_API_KEY}

# -----------------------------------------------------------------------------
# RETENTION
# -----------------------------------------------------------------------------
retention:
  # Files dated more than this many days ago are deleted
  days: 30
  # How often to check for rotation and expired files
  check_interval: 24h

# -----------------------------------------------------------------------------
# TAIL
# -----------------------------------------------------------------------------
tail:
  # Batches queued per live tail; a tail that falls this far behind is dropped
  queue_capacity: 1024
"#
    .to_string()
}
