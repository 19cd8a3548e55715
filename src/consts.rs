pub const DEFAULT_API_URL: &str = "http://localhost:8080/";

pub const CONFIG_ENV_PREFIX: &str = "CUT_VISUALISER";
pub const CONFIG_PATH_ENV: &str = "CUT_VISUALISER__CONFIG";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;
