mod cli;
pub mod connection;
mod consts;
pub mod dataset;
pub mod element;
pub mod fetcher;
mod settings;
pub mod style;
pub mod visualisation;


pub use self::settings::{ApiSettings, ConnectionSettings, RenderSettings, Settings};
pub use cli::Args;
pub use connection::{Connection, ConnectionKind, ConnectionPool, ConnectionSpec, PoolError};
pub use dataset::{
    cut::{Cut, CutValue, PartialCut},
    Dataset, DatasetDescription,
};
pub use element::{Element, ElementError, ElementKind, ElementSettings, ResolvedElement};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use style::{StyleValue, Styles};
pub use visualisation::{Visualisation, VisualisationConfig};
