use crate::error::Result;
use crate::expenses::classify_batch;

use super::Context;

pub async fn run(user: Option<String>) -> Result<()> {
    let ctx = Context::open(user)?;
    let classifier = ctx.classifier()?;
    let outcome = classify_batch(&ctx.conn, &classifier, &ctx.user).await?;
    println!(
        "{} categorized, {} still uncategorized",
        outcome.changed,
        outcome.processed - outcome.changed
    );
    Ok(())
}
