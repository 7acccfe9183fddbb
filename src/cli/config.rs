use crate::config::{generate_starter_config, load_config, SYSTEM_CONFIG_PATH, USER_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = write_config(&config_content, default_config_path())?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// `~/.config/sls/config.yml` when its directory can be created, otherwise
/// `/etc/sls/config.yml`.
fn default_config_path() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(USER_CONFIG_PATH);
        match user_config.parent().map(fs::create_dir_all) {
            Some(Ok(())) => return user_config,
            Some(Err(_)) | None => {
                eprintln!("Warning: Could not create {}", user_config.display());
                eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
            }
        }
    }

    PathBuf::from(SYSTEM_CONFIG_PATH)
}

/// Write `config_content` to `path`, refusing to overwrite an existing file.
fn write_config(config_content: &str, path: PathBuf) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&path, config_content)?;
    Ok(path)
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match load_config(path) {
        Ok(_) => {
            println!("✓ Config is valid");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Config validation failed:\n{}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_config_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.yml");

        let written = write_config("a: 1\n", path.clone()).unwrap();
        assert_eq!(written, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a: 1\n");

        assert!(write_config("a: 2\n", path.clone()).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "a: 1\n");
    }
}
