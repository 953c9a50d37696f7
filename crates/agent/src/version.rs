/// Build version. An `APP_VERSION` set at compile time wins over the crate version.
pub const VERSION: &str = match option_env!("APP_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// `User-Agent` the HTTP checks identify themselves with.
pub fn user_agent() -> String {
    format!("lookout-agent/{VERSION}")
}
