//! HTTP client for the board's XML/CGI interface.
//!
//! ```text
//! GET /protect/status.xml           -> <response><led0>1</led0>...</response>
//! GET /protect/leds.cgi?led=<index> -> toggles one relay, body ignored
//! ```
//!
//! Both endpoints use HTTP basic auth. Status reads use a short timeout since
//! they run every poll cycle; toggles get more time.

use std::time::Duration;

use tracing::{debug, info};

use super::{RawStates, RelayControl, RelayError, RelayState};
use crate::config::BoardConfig;

pub const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RelayClient {
    http: reqwest::Client,
    status_timeout: Duration,
    command_timeout: Duration,
}

impl RelayClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(STATUS_TIMEOUT, COMMAND_TIMEOUT)
    }

    pub fn with_timeouts(
        status_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self {
            http,
            status_timeout,
            command_timeout,
        })
    }

    async fn get(
        &self,
        board: &BoardConfig,
        url: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response, RelayError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&board.username, Some(&board.password))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(board, e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                board: board.device_id.clone(),
                status,
            });
        }
        Ok(response)
    }
}

fn request_error(board: &BoardConfig, source: reqwest::Error, timeout: Duration) -> RelayError {
    if source.is_timeout() {
        RelayError::Timeout {
            board: board.device_id.clone(),
            timeout,
        }
    } else {
        RelayError::Network {
            board: board.device_id.clone(),
            source,
        }
    }
}

/// Decodes the status document. Every relay index of the board needs a
/// direct `led<i>` child of the root holding `0` or `1`.
pub fn parse_status(board: &BoardConfig, body: &str) -> Result<RawStates, RelayError> {
    let parse_error = |reason: String| RelayError::Parse {
        board: board.device_id.clone(),
        reason,
    };

    let document = roxmltree::Document::parse(body).map_err(|e| parse_error(e.to_string()))?;
    let root = document.root_element();

    let mut states = RawStates::new();
    for index in board.relay_indices() {
        let name = format!("led{}", index);
        let node = root
            .children()
            .find(|node| node.is_element() && node.has_tag_name(name.as_str()))
            .ok_or_else(|| parse_error(format!("missing <{}>", name)))?;

        let bit = match node.text().map(str::trim) {
            Some("1") => true,
            Some("0") => false,
            other => {
                return Err(parse_error(format!(
                    "<{}> holds {:?}, expected 0 or 1",
                    name,
                    other.unwrap_or("")
                )))
            }
        };
        states.insert(index, bit);
    }
    Ok(states)
}

impl RelayControl for RelayClient {
    async fn fetch_states(&self, board: &BoardConfig) -> Result<RawStates, RelayError> {
        let timeout = self.status_timeout;
        let response = self.get(board, &board.status_url(), timeout).await?;
        let body = response
            .text()
            .await
            .map_err(|e| request_error(board, e, timeout))?;

        let states = parse_status(board, &body)?;
        debug!("Fetched {} relay states from {}", states.len(), board.device_id);
        Ok(states)
    }

    async fn set_relay(
        &self,
        board: &BoardConfig,
        index: usize,
        state: RelayState,
    ) -> Result<(), RelayError> {
        if board.skip_redundant_toggle {
            let current = self.fetch_states(board).await.inspect_err(|e| {
                debug!(
                    "Could not read relay {} on {} before toggling: {}",
                    index, board.device_id, e
                )
            })?;
            if current.get(&index).copied() == Some(state.is_on()) {
                debug!(
                    "Relay {} on {} already at {}, skipping toggle",
                    index, board.device_id, state
                );
                return Ok(());
            }
        }

        let response = self
            .get(board, &board.toggle_url(index), self.command_timeout)
            .await
            .inspect_err(|e| {
                debug!(
                    "Failed to toggle relay {} on {}: {}",
                    index, board.device_id, e
                )
            })?;

        info!(
            "Toggled relay {} on {} towards {}, response: {}",
            index,
            board.device_id,
            state,
            response.status()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // admin:secret
    const AUTH: &str = "Basic YWRtaW46c2VjcmV0";

    fn status_xml(bits: &[u8]) -> String {
        let leds: String = bits
            .iter()
            .enumerate()
            .map(|(i, bit)| format!("<led{i}>{bit}</led{i}>"))
            .collect();
        format!("<?xml version=\"1.0\"?><response>{leds}<pot0>12</pot0></response>")
    }

    async fn setup(relay_count: usize) -> (MockServer, BoardConfig) {
        let server = MockServer::start().await;
        let mut board = fixtures::board("giant_1", relay_count);
        board.host = server.address().ip().to_string();
        board.port = server.address().port();
        (server, board)
    }

    #[test]
    fn parses_bits_with_whitespace() {
        let board = fixtures::board("giant_1", 3);
        let body = "<response><led0> 1 </led0><led1>0</led1>\n<led2>1</led2></response>";
        let states = parse_status(&board, body).unwrap();
        assert_eq!(
            states,
            RawStates::from([(0, true), (1, false), (2, true)])
        );
    }

    #[test]
    fn missing_led_is_a_parse_failure() {
        let board = fixtures::board("giant_1", 3);
        let err = parse_status(&board, "<response><led0>1</led0><led1>0</led1></response>")
            .unwrap_err();
        assert!(matches!(err, RelayError::Parse { .. }), "got {err:?}");
        assert_eq!(err.board(), "giant_1");
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        let board = fixtures::board("giant_1", 1);
        assert!(matches!(
            parse_status(&board, "<response><led0>on</led0></response>"),
            Err(RelayError::Parse { .. })
        ));
        assert!(matches!(
            parse_status(&board, "not xml at all"),
            Err(RelayError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_states_reads_status_document() {
        let (server, board) = setup(4).await;
        Mock::given(method("GET"))
            .and(path("/protect/status.xml"))
            .and(header("authorization", AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_string(status_xml(&[1, 0, 0, 1])))
            .expect(1)
            .mount(&server)
            .await;

        let client = RelayClient::new().unwrap();
        let states = client.fetch_states(&board).await.unwrap();
        assert_eq!(
            states,
            RawStates::from([(0, true), (1, false), (2, false), (3, true)])
        );
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let (server, board) = setup(2).await;
        Mock::given(method("GET"))
            .and(path("/protect/status.xml"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = RelayClient::new().unwrap();
        let err = client.fetch_states(&board).await.unwrap_err();
        assert!(
            matches!(err, RelayError::Status { status, .. } if status.as_u16() == 401),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn slow_board_times_out() {
        let (server, board) = setup(1).await;
        Mock::given(method("GET"))
            .and(path("/protect/status.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(status_xml(&[1]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            RelayClient::with_timeouts(Duration::from_millis(100), COMMAND_TIMEOUT).unwrap();
        let err = client.fetch_states(&board).await.unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_board_is_a_network_failure() {
        let mut board = fixtures::board("giant_1", 1);
        // Bind and drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        board.port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = RelayClient::new().unwrap();
        let err = client.fetch_states(&board).await.unwrap_err();
        assert!(matches!(err, RelayError::Network { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn set_relay_hits_toggle_endpoint() {
        let (server, board) = setup(4).await;
        Mock::given(method("GET"))
            .and(path("/protect/leds.cgi"))
            .and(query_param("led", "3"))
            .and(header("authorization", AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = RelayClient::new().unwrap();
        client.set_relay(&board, 3, RelayState::On).await.unwrap();
    }

    #[tokio::test]
    async fn set_relay_reports_failure() {
        let (server, board) = setup(4).await;
        Mock::given(method("GET"))
            .and(path("/protect/leds.cgi"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = RelayClient::new().unwrap();
        let err = client
            .set_relay(&board, 0, RelayState::Off)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Status { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn redundant_toggle_is_skipped_when_guarded() {
        let (server, mut board) = setup(2).await;
        board.skip_redundant_toggle = true;
        Mock::given(method("GET"))
            .and(path("/protect/status.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(status_xml(&[1, 0])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/protect/leds.cgi"))
            .and(query_param("led", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/protect/leds.cgi"))
            .and(query_param("led", "0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = RelayClient::new().unwrap();
        // Relay 0 already reads 1: no toggle.
        client.set_relay(&board, 0, RelayState::On).await.unwrap();
        // Relay 1 reads 0: toggle.
        client.set_relay(&board, 1, RelayState::On).await.unwrap();
    }
}
