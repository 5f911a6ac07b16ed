use super::config::ConnectionOptions;
use crate::core::DocError;
use std::error::Error as StdError;
use std::io;
use std::net::IpAddr;

/// Rewrites a refused connection against a loopback endpoint into
/// [`DocError::EmulatorNotRunning`]. Everything else passes through.
pub fn diagnose(options: &ConnectionOptions, err: DocError) -> DocError {
    if !matches!(err, DocError::ServiceUnavailable { .. } | DocError::Aggregate(_)) {
        return err;
    }
    let loopback = options.endpoint_host().is_some_and(|h| is_loopback_host(&h));
    if loopback && is_connection_refused(&err) {
        tracing::event!(
            tracing::Level::WARN,
            endpoint = %options.account_endpoint,
            "connection refused by local endpoint"
        );
        return DocError::EmulatorNotRunning {
            endpoint: options.account_endpoint.clone(),
            source: Box::new(err),
        };
    }
    err
}

pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}

/// Walks the cause chain, descending into every member of an aggregate.
pub fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        if io_err.kind() == io::ErrorKind::ConnectionRefused {
            return true;
        }
    }
    if let Some(DocError::Aggregate(inner)) = err.downcast_ref::<DocError>() {
        if inner.iter().any(|e| is_connection_refused(e)) {
            return true;
        }
    }
    err.source().is_some_and(is_connection_refused)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> DocError {
        DocError::service_unavailable(
            "request failed",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        )
    }

    #[test]
    fn test_loopback_hosts() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("[::1]"));
        assert!(!is_loopback_host("acct.example.com"));
        assert!(!is_loopback_host("10.0.0.1"));
    }

    #[test]
    fn test_refused_loopback_is_rewritten() {
        let options = ConnectionOptions::emulator("key");
        let err = diagnose(&options, refused());
        assert!(matches!(err, DocError::EmulatorNotRunning { .. }));
    }

    #[test]
    fn test_refused_inside_nested_aggregate_is_rewritten() {
        let options = ConnectionOptions::emulator("key");
        let nested = DocError::Aggregate(vec![
            DocError::Cancelled,
            DocError::Aggregate(vec![refused()]),
        ]);
        let err = diagnose(&options, nested);
        assert!(matches!(err, DocError::EmulatorNotRunning { .. }));
    }

    #[test]
    fn test_remote_endpoint_is_untouched() {
        let options = ConnectionOptions::new(
            "https://acct.example.com/",
            crate::connection::Credential::Key("k".into()),
        );
        let err = diagnose(&options, refused());
        assert!(matches!(err, DocError::ServiceUnavailable { .. }));
    }

    #[test]
    fn test_other_unavailable_causes_are_untouched() {
        let options = ConnectionOptions::emulator("key");
        let err = DocError::service_unavailable(
            "timeout",
            io::Error::new(io::ErrorKind::TimedOut, "timed out"),
        );
        assert!(matches!(
            diagnose(&options, err),
            DocError::ServiceUnavailable { .. }
        ));
    }
}
