use std::time::Duration;

use async_trait::async_trait;
use plektron_net::{Headers, Net, NetError, NetExt, Request, Response, TimeoutNet};
use rstest::*;
use url::Url;

// Mock Net implementation for testing timeout logic
#[derive(Clone)]
struct MockNet {
    delay: Duration,
    should_succeed: bool,
}

impl MockNet {
    fn new(delay: Duration, should_succeed: bool) -> Self {
        Self {
            delay,
            should_succeed,
        }
    }
}

#[async_trait]
impl Net for MockNet {
    async fn open(&self, request: Request) -> Result<Response, NetError> {
        tokio::time::sleep(self.delay).await;
        if !self.should_succeed {
            return Err(NetError::Http("mock error".to_string()));
        }
        // Body never ends: the timeout must not apply to streaming.
        let body = futures::stream::pending::<Result<bytes::Bytes, NetError>>();
        Ok(Response {
            status: 200,
            url: request.url,
            headers: Headers::new(),
            body: Box::pin(body),
        })
    }
}

fn request() -> Request {
    Request::new(Url::parse("http://example.com/a.mp4").unwrap())
}

#[rstest]
#[case::fast_success(Duration::from_millis(10), Duration::from_millis(500), true, true)]
#[case::fast_failure(Duration::from_millis(10), Duration::from_millis(500), false, false)]
#[case::slow_times_out(Duration::from_millis(500), Duration::from_millis(50), true, false)]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn test_timeout_bounds_response_phase(
    #[case] delay: Duration,
    #[case] timeout: Duration,
    #[case] should_succeed: bool,
    #[case] expect_ok: bool,
) {
    let net = MockNet::new(delay, should_succeed).with_timeout(timeout);
    let result = net.open(request()).await;
    assert_eq!(result.is_ok(), expect_ok);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn test_timeout_error_is_timeout() {
    let net = TimeoutNet::new(
        MockNet::new(Duration::from_millis(300), true),
        Duration::from_millis(20),
    );
    let err = net.open(request()).await.unwrap_err();
    assert_eq!(err, NetError::Timeout);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn test_timeout_does_not_cover_body() {
    let net = MockNet::new(Duration::ZERO, true).with_timeout(Duration::from_millis(20));
    let response = net.open(request()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    // Response still usable after the timeout elapsed.
    assert_eq!(response.status, 200);
}
