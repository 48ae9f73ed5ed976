use std::{sync::Arc, time::Duration};

use plektron_core::LiveRegistry;
use plektron_events::SourceEvent;
use plektron_net::{Headers, HttpClient, NetOptions, RangeSpec};
use plektron_source::{InitError, PrefetchConfig, PrefetchSource, ReadError};
use plektron_test_utils::{MediaRoute, ScriptedNet, ScriptedResponse, TestHttpServer, pattern};
use rstest::*;
use url::Url;

const URL: &str = "http://media.test/clip.webm";

fn config() -> PrefetchConfig {
    PrefetchConfig::new(Url::parse(URL).unwrap()).with_guess_bound(4095)
}

fn ranges(net: &ScriptedNet) -> Vec<Option<String>> {
    net.requests()
        .iter()
        .map(|r| r.range.as_ref().map(RangeSpec::to_header_value))
        .collect()
}

async fn initialized(data: &[u8]) -> (Arc<ScriptedNet>, PrefetchSource) {
    let net = Arc::new(ScriptedNet::serving(data.to_vec()));
    let source = PrefetchSource::new(config(), net.clone(), LiveRegistry::shared());
    source.initialize().await.unwrap();
    (net, source)
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn initialize_prefetches_the_head() {
    let data = pattern(10_000);
    let net = Arc::new(ScriptedNet::serving(data.clone()));
    let source = PrefetchSource::new(config(), net.clone(), LiveRegistry::shared());
    let mut events = source.events();

    source.initialize().await.unwrap();
    assert_eq!(ranges(&net), vec![Some("bytes=0-4095".to_string())]);
    assert_eq!(source.total_bytes(), Some(10_000));
    assert_eq!(events.recv().await.unwrap(), SourceEvent::Downloading(true));
    assert_eq!(events.recv().await.unwrap(), SourceEvent::TotalBytes(10_000));

    let head = source.read(100, 200).await.unwrap();
    assert_eq!(&head[..], &data[100..300]);
    assert_eq!(net.attempts(), 1);
    assert_eq!(
        source.buffered_ranges().iter().cloned().collect::<Vec<_>>(),
        vec![0..4096]
    );
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn miss_over_fetches_and_serves_nearby_reads() {
    let data = pattern(10_000);
    let (net, source) = initialized(&data).await;

    let far = source.read(6000, 100).await.unwrap();
    assert_eq!(&far[..], &data[6000..6100]);
    assert_eq!(
        ranges(&net).last(),
        Some(&Some("bytes=6000-6500".to_string()))
    );

    let near = source.read(6200, 100).await.unwrap();
    assert_eq!(&near[..], &data[6200..6300]);
    assert_eq!(net.attempts(), 2);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn over_fetch_is_clamped_to_the_resource() {
    let data = pattern(10_000);
    let (net, source) = initialized(&data).await;

    let tail = source.read(9950, 100).await.unwrap();
    assert_eq!(&tail[..], &data[9950..]);
    assert_eq!(
        ranges(&net).last(),
        Some(&Some("bytes=9950-9999".to_string()))
    );

    assert!(source.read(10_000, 10).await.unwrap().is_empty());
    assert!(source.read(20_000, 10).await.unwrap().is_empty());
    assert_eq!(net.attempts(), 2);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn read_during_head_prefetch_still_completes_initialize() {
    let data = pattern(10_000);
    let mut headers = Headers::new();
    headers.insert("Content-Range", "bytes 0-4095/10000");
    let (response, _body) = ScriptedResponse::streaming(206, headers);
    let net = Arc::new(ScriptedNet::serving(data.clone()).push(response));
    let source = Arc::new(PrefetchSource::new(
        config(),
        net.clone(),
        LiveRegistry::shared(),
    ));
    let mut events = source.events();

    let init = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.initialize().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let far = source.read(5000, 100).await.unwrap();
    assert_eq!(&far[..], &data[5000..5100]);

    let init = tokio::time::timeout(Duration::from_secs(1), init)
        .await
        .expect("initialize should complete once the head fetch is displaced");
    assert_eq!(init.unwrap(), Ok(()));
    assert_eq!(
        ranges(&net),
        vec![
            Some("bytes=0-4095".to_string()),
            Some("bytes=5000-5500".to_string()),
        ]
    );

    let mut downloading = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SourceEvent::Downloading(active) = event {
            downloading.push(active);
        }
    }
    assert_eq!(downloading[..3], [true, false, true]);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn oversized_read_fails_without_fetching() {
    let data = pattern(10_000);
    let net = Arc::new(ScriptedNet::serving(data.clone()));
    let source = PrefetchSource::new(
        config().with_max_read_size(1000),
        net.clone(),
        LiveRegistry::shared(),
    );
    source.initialize().await.unwrap();

    match source.read(5000, 2000).await {
        Err(ReadError::Failed { position, reason }) => {
            assert_eq!(position, 5000);
            assert!(reason.contains("2000 bytes"), "{reason}");
        }
        other => panic!("unexpected read result: {other:?}"),
    }
    assert_eq!(net.attempts(), 1);

    let chunk = source.read(5000, 1000).await.unwrap();
    assert_eq!(&chunk[..], &data[5000..6000]);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn finish_without_coverage_fails_the_read() {
    let data = pattern(10_000);
    let net = Arc::new(
        ScriptedNet::new()
            .push(ScriptedResponse::partial(&data, 0, 4095, Some(10_000)))
            .push(ScriptedResponse::partial(&data, 6000, 6009, Some(10_000))),
    );
    let source = PrefetchSource::new(config(), net.clone(), LiveRegistry::shared());
    let mut events = source.events();
    source.initialize().await.unwrap();

    assert!(matches!(
        source.read(6000, 100).await,
        Err(ReadError::Failed { position: 6000, .. })
    ));
    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= matches!(event, SourceEvent::ReadFailed { position: 6000, .. });
    }
    assert!(failed);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn transport_failure_fails_initialize() {
    let source = PrefetchSource::new(
        config(),
        Arc::new(ScriptedNet::always_failing()),
        LiveRegistry::shared(),
    );
    assert!(matches!(
        source.initialize().await,
        Err(InitError::Failed(_))
    ));
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn transport_failure_fails_pending_read() {
    let data = pattern(10_000);
    let net = Arc::new(ScriptedNet::new().push(ScriptedResponse::partial(
        &data,
        0,
        4095,
        Some(10_000),
    )));
    let source = PrefetchSource::new(config(), net, LiveRegistry::shared());
    source.initialize().await.unwrap();

    match source.read(8000, 10).await {
        Err(ReadError::Failed { position, reason }) => {
            assert_eq!(position, 8000);
            assert!(reason.contains("script exhausted"), "{reason}");
        }
        other => panic!("unexpected read result: {other:?}"),
    }
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn unexpected_status_fails_initialize() {
    let net = ScriptedNet::new().push(ScriptedResponse::Respond {
        status: 404,
        url: None,
        headers: Headers::new(),
        body: plektron_test_utils::ScriptedBody::Chunks(Vec::new()),
    });
    let source = PrefetchSource::new(config(), Arc::new(net), LiveRegistry::shared());

    match source.initialize().await {
        Err(InitError::Failed(reason)) => assert!(reason.contains("404"), "{reason}"),
        other => panic!("unexpected init result: {other:?}"),
    }
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn stop_fails_pending_read() {
    let data = pattern(10_000);
    let mut headers = Headers::new();
    headers.insert("Content-Range", "bytes 5000-5499/10000");
    let (response, _body) = ScriptedResponse::streaming(206, headers);
    let net = Arc::new(
        ScriptedNet::new()
            .push(ScriptedResponse::partial(&data, 0, 4095, Some(10_000)))
            .push(response),
    );
    let source = Arc::new(PrefetchSource::new(config(), net, LiveRegistry::shared()));
    source.initialize().await.unwrap();

    let reader = {
        let source = Arc::clone(&source);
        tokio::spawn(async move { source.read(5000, 100).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    source.stop();
    assert_eq!(reader.await.unwrap(), Err(ReadError::Stopped));
    assert_eq!(source.read(0, 10).await, Err(ReadError::Stopped));
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[tokio::test]
async fn released_owner_never_completes_initialize() {
    let guard = LiveRegistry::shared();
    let source = PrefetchSource::new(
        config(),
        Arc::new(ScriptedNet::serving(pattern(10_000))),
        Arc::clone(&guard),
    );
    guard.unregister(source.owner_id());

    let init = tokio::time::timeout(Duration::from_millis(200), source.initialize()).await;
    assert!(init.is_err());
    assert_eq!(source.total_bytes(), None);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn server_ignoring_ranges_still_serves_reads() {
    let data = pattern(20_000);
    let route = MediaRoute::new(data.clone())
        .ignoring_ranges()
        .with_chunk_size(1024);
    let server = TestHttpServer::new(route.router("/clip.webm")).await;
    let config = PrefetchConfig::new(server.url("/clip.webm")).with_guess_bound(4095);
    let source = PrefetchSource::new(
        config,
        Arc::new(HttpClient::new(NetOptions::default()).unwrap()),
        LiveRegistry::shared(),
    );

    source.initialize().await.unwrap();
    assert_eq!(source.total_bytes(), Some(20_000));

    let chunk = source.read(1000, 2000).await.unwrap();
    assert_eq!(&chunk[..], &data[1000..3000]);

    let far = source.read(15_000, 500).await.unwrap();
    assert_eq!(&far[..], &data[15_000..15_500]);
}
