pub const VERSION: &str = match option_env!("FORMATION_BUILD_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

pub fn user_agent() -> String {
    format!("formation/{VERSION}")
}
