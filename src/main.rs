use anyhow::Context;
use clap::Parser;
use cut_visualiser::{
    Args, CutValue, Dataset, DatasetDescription, HttpFetcher, PartialCut, Settings, Visualisation,
    VisualisationConfig,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct VisualisationFile {
    dataset: DatasetDescription,
    visualisation: VisualisationConfig,
}

fn parse_cuts(cuts: &[String]) -> anyhow::Result<PartialCut> {
    cuts.iter().try_fold(PartialCut::new(), |partial, cut| {
        let (field, value) = cut
            .split_once('=')
            .with_context(|| format!("cut '{cut}' is not of the form field=value"))?;
        Ok(partial.set(field, CutValue::id(value)))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = match &args.config_path {
        Some(path) => Settings::build(Some(path.as_path())),
        None => Settings::new(),
    }
    .context("failed to load settings")?;

    let file = std::fs::read_to_string(&args.visualisation)
        .with_context(|| format!("failed to read {}", args.visualisation.display()))?;
    let file: VisualisationFile =
        serde_json::from_str(&file).context("invalid visualisation file")?;

    let fetcher = Arc::new(HttpFetcher::new(
        settings.api.url.clone(),
        settings.api.request_timeout(),
    )?);
    let dataset = Arc::new(Dataset::new(file.dataset, fetcher, &settings.connections));
    let mut config = file.visualisation;
    for (name, value) in settings.styles {
        config.styles.entry(name).or_insert(value);
    }
    let visualisation = Visualisation::new(config, dataset)?;

    let cuts = parse_cuts(&args.cuts)?;
    if !cuts.is_empty() {
        visualisation.add_cut(&cuts);
    }

    let timeout = settings.render.ready_timeout();
    visualisation
        .wait_until_ready(timeout)
        .await
        .with_context(|| format!("elements were not ready within {timeout:?}"))?;
    let resolved = visualisation.resolve().unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&resolved)?);

    visualisation.close()?;
    Ok(())
}
