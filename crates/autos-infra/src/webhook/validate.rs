//! Webhook URL validation, run before any network call.

use autos_core::PipelineError;

/// Ports never accepted as a webhook target.
const DENIED_PORTS: [u16; 3] = [22, 23, 3389];

/// Validate a callback URL. `production_profile` rejects plain http outside
/// loopback; other tiers accept it with a warning.
pub fn validate_webhook_url(url: &str, production_profile: bool) -> Result<(), PipelineError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| PipelineError::Validation(format!("Invalid webhook URL: {}", e)))?;

    match parsed.scheme() {
        "https" => {}
        "http" => {
            let loopback = is_loopback_host(parsed.host_str());
            if production_profile && !loopback {
                return Err(PipelineError::Validation(
                    "Plain http webhook URLs are not allowed in production".to_string(),
                ));
            }
            if !loopback {
                tracing::warn!(url, "Webhook URL uses plain http");
            }
        }
        other => {
            return Err(PipelineError::Validation(format!(
                "Webhook URL scheme '{}' is not supported, use http or https",
                other
            )));
        }
    }

    if parsed.host_str().filter(|h| !h.is_empty()).is_none() {
        return Err(PipelineError::Validation(
            "Webhook URL must have a host".to_string(),
        ));
    }

    if let Some(port) = parsed.port() {
        if DENIED_PORTS.contains(&port) {
            return Err(PipelineError::Validation(format!(
                "Webhook URL port {} is not allowed",
                port
            )));
        }
    }

    Ok(())
}

fn is_loopback_host(host: Option<&str>) -> bool {
    match host {
        Some("localhost") => true,
        Some(h) => h
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_always_accepted() {
        assert!(validate_webhook_url("https://caller.example/hook", true).is_ok());
        assert!(validate_webhook_url("https://caller.example/hook", false).is_ok());
    }

    #[test]
    fn plain_http_rejected_in_production() {
        assert!(validate_webhook_url("http://caller.example/hook", true).is_err());
        assert!(validate_webhook_url("http://caller.example/hook", false).is_ok());
    }

    #[test]
    fn loopback_http_allowed_even_in_production() {
        assert!(validate_webhook_url("http://localhost:8080/hook", true).is_ok());
        assert!(validate_webhook_url("http://127.0.0.1:8080/hook", true).is_ok());
        assert!(validate_webhook_url("http://[::1]:8080/hook", true).is_ok());
    }

    #[test]
    fn non_http_schemes_rejected() {
        assert!(validate_webhook_url("ftp://caller.example/hook", false).is_err());
        assert!(validate_webhook_url("file:///etc/passwd", false).is_err());
    }

    #[test]
    fn admin_ports_denied() {
        for port in [22, 23, 3389] {
            let url = format!("https://caller.example:{}/hook", port);
            assert!(validate_webhook_url(&url, false).is_err(), "port {}", port);
        }
        assert!(validate_webhook_url("https://caller.example:8443/hook", false).is_ok());
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let err = validate_webhook_url("not a url", false).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
