pub mod commands;
pub mod config;

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use websheet_engine::Sheet;

use crate::commands::{execute, Command, Session};
use crate::config::Config;

/// Open the configured sheet file, or start an empty sheet
pub fn open_sheet(config: &Config) -> anyhow::Result<Sheet> {
    if config.save_file.exists() {
        Ok(Sheet::load(&config.save_file, config.sheet.clone())?)
    } else {
        info!(path = %config.save_file.display(), "no sheet file, starting empty");
        Ok(Sheet::new(config.sheet.clone()))
    }
}

/// Read commands from stdin until `quit` or end of input, polling time
/// triggers in between; the sheet is saved on the way out
pub async fn run_console(config: Config) -> anyhow::Result<()> {
    let mut sheet = open_sheet(&config)?;
    sheet.create_user(&config.user);
    let mut session = Session {
        user: config.user.clone(),
        save_file: config.save_file.clone(),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = tokio::time::interval(Duration::from_secs(config.sheet.poll_interval_secs.max(1)));

    info!(user = %session.user, "console ready (type 'help')");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => match execute(command, &mut sheet, &mut session) {
                        Ok(reply) => println!("{}", reply),
                        Err(e) => println!("error: {:#}", e),
                    },
                    Err(e) => println!("error: {:#}", e),
                }
            }
            _ = poll.tick() => {
                let expired = sheet.poll_time();
                if expired > 0 {
                    info!(expired, "time triggers polled");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
        }
    }

    sheet.save(&session.save_file)?;
    Ok(())
}
