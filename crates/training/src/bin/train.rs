use clap::Parser;
use training::logging::init_tracing;
use training::{run_train, TrainArgs, TrainConfig};

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    init_tracing(args.verbose)?;
    let cfg = TrainConfig::resolve(&args)?;
    let summary = run_train(&cfg)?;
    match (summary.best_val_loss, &summary.checkpoint) {
        (Some(loss), Some(path)) => tracing::info!(
            best_val_loss = loss,
            final_lr = summary.final_lr,
            "training finished; best model at {}",
            path.display()
        ),
        _ => tracing::warn!("training finished without a finite validation loss; no checkpoint written"),
    }
    Ok(())
}
