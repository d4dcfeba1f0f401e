//! Logical service naming for telemetry.

/// Base name reported by every telemetry signal.
pub const SERVICE_NAME: &str = "proxy";

/// Telemetry service name for an active service set.
///
/// `""` and `"all"` map to the bare base name; anything else is suffixed.
pub fn service_name(services: &str) -> String {
    match services.trim() {
        "" | "all" => SERVICE_NAME.to_string(),
        other => format!("{SERVICE_NAME}-{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name() {
        assert_eq!(service_name(""), "proxy");
        assert_eq!(service_name("all"), "proxy");
        assert_eq!(service_name("authorize"), "proxy-authorize");
    }
}
