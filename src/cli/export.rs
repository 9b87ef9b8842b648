use crate::error::Result;
use crate::reports::{export, ExportFormat};
use crate::settings::shellexpand_path;

use super::{today, Context, WindowArgs};

pub fn run(user: Option<String>, format: &str, output: Option<&str>, window: &WindowArgs) -> Result<()> {
    let ctx = Context::open(user)?;
    let format: ExportFormat = format.parse()?;
    let window = window.resolve(today())?;
    let body = export(&ctx.conn, &ctx.user, window.as_ref(), format)?;

    match output {
        Some(path) => {
            let path = shellexpand_path(path);
            std::fs::write(&path, &body)?;
            eprintln!("Exported to {path}");
        }
        None => print!("{body}"),
    }
    Ok(())
}
