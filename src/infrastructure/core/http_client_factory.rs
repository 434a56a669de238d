use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Outbound HTTP client shared by the quote, broker, chat and risk
    /// clients. Transient failures (5xx, connect errors) retry up to
    /// three times with exponential backoff; the request timeout stays
    /// inside the 10 s deadline inherited from the originating event.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Client with no retry middleware, for calls that must fail fast
    /// (the AI risk analysis path and the 3 s chat acks).
    pub fn create_fast_client(timeout: Duration) -> ClientWithMiddleware {
        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client).build()
    }
}

/// Build a URL with query parameters. reqwest-middleware does not
/// expose `.query()`, so the query string is appended manually.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k.as_ref()), percent_encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

fn percent_encode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_with_query() {
        let url = build_url_with_query("https://api.example.com/quote", &[("symbol", "AAPL")]);
        assert_eq!(url, "https://api.example.com/quote?symbol=AAPL");

        let url = build_url_with_query("https://api.example.com/quote?a=1", &[("b", "2")]);
        assert_eq!(url, "https://api.example.com/quote?a=1&b=2");
    }

    #[test]
    fn test_query_values_are_encoded() {
        let url = build_url_with_query("https://x", &[("q", "a b&c")]);
        assert_eq!(url, "https://x?q=a%20b%26c");
    }
}
