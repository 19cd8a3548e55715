use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file, overridden by `CUT_VISUALISER__*` env variables.
    #[clap(short, long)]
    pub config_path: Option<std::path::PathBuf>,
    /// JSON file with the dataset description and the visualisation config.
    #[clap(short, long, default_value = "visualisation.json")]
    pub visualisation: std::path::PathBuf,
    /// Initial cuts applied before rendering, as `field=value`.
    #[clap(long = "cut")]
    pub cuts: Vec<String>,
}
