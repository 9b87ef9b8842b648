use std::path::PathBuf;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, settings_file_exists, shellexpand_path};

use super::locale_format;

pub fn run(
    data_dir: Option<String>,
    user: Option<String>,
    no_ai: bool,
    locale: Option<String>,
) -> Result<()> {
    let existed = settings_file_exists();
    let mut settings = load_settings();

    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(user) = user {
        settings.user = user;
    }
    if no_ai {
        settings.ai.enabled = false;
    }
    if let Some(locale) = locale {
        settings.csv = locale_format(&locale)?;
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;

    if existed {
        println!("Updated spendtrack at {}", resolved.display());
    } else {
        println!("Initialized spendtrack at {}", resolved.display());
    }
    println!("User: {}", settings.user);
    if !settings.ai.enabled {
        println!("AI categorization: off");
    } else if std::env::var(crate::ai::API_KEY_VAR).is_err() {
        println!(
            "AI categorization: on, but {} is not set (rules only until it is)",
            crate::ai::API_KEY_VAR
        );
    }
    Ok(())
}
