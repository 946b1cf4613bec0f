use std::env;
use std::path::PathBuf;

use websheet_engine::SheetOptions;

/// Console configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Sheet file loaded at startup and written on exit
    pub save_file: PathBuf,
    /// User the console acts as until `login` switches it
    pub user: String,
    pub sheet: SheetOptions,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let sheet = SheetOptions::from_env()?;
        let save_file = env::var("WEBSHEET_SAVE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_save_file(env::var("HOME").ok()));
        let user = env::var("WEBSHEET_USER").unwrap_or_else(|_| sheet.admin_user.clone());

        Ok(Self {
            save_file,
            user,
            sheet,
        })
    }
}

fn default_save_file(home: Option<String>) -> PathBuf {
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".websheets")
}
