use std::{collections::BTreeSet, io::Cursor, sync::Mutex as StdMutex, time::Duration};

use async_trait::async_trait;
use test_case::test_case;
use tokio::sync::Barrier;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

use self::helpers::*;
use super::*;
use crate::{
    client::{EndpointConfig, UpdateClient},
    payload::AppVersions,
};

mod helpers {
    use super::*;

    pub fn reader(csv: &str) -> DeviceReader<Cursor<String>> {
        DeviceReader::new(Cursor::new(csv.to_owned())).unwrap()
    }

    pub fn batch_csv(ids: &[String]) -> String {
        let mut csv = String::from("mac_addresses\n");
        for id in ids {
            csv.push_str(id);
            csv.push('\n');
        }
        csv
    }

    pub fn macs(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("02:00:00:00:{:02x}:{:02x}", i / 256, i % 256))
            .collect()
    }

    pub fn empty_payload() -> UpdatePayload {
        UpdatePayload::build(&AppVersions::new()).unwrap()
    }

    /// Records every device it is asked to update.
    #[derive(Default)]
    pub struct Recording {
        pub calls: StdMutex<Vec<String>>,
        pub fail: BTreeSet<String>,
    }

    impl Recording {
        pub fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Updater for Recording {
        async fn update(&self, device: &DeviceId, _payload: &UpdatePayload) -> UpdateOutcome {
            tokio::task::yield_now().await;
            self.calls.lock().unwrap().push(device.to_string());
            if self.fail.contains(device.as_str()) {
                UpdateOutcome::TransportError {
                    cause: "connection refused".into(),
                }
            } else {
                UpdateOutcome::Success
            }
        }
    }

    pub async fn dispatch_recording(
        updater: Recording,
        workers: usize,
        csv: &str,
    ) -> (Result<BatchSummary, BatchError>, Vec<String>) {
        let dispatcher = Dispatcher::new(updater, workers).unwrap();
        let result = dispatcher.run(reader(csv), empty_payload()).await;
        let calls = dispatcher.updater.calls.lock().unwrap().clone();
        (result, calls)
    }

    pub fn client_for(server: &MockServer) -> UpdateClient {
        UpdateClient::new(EndpointConfig {
            api: server.uri(),
            hostname: "test-host".into(),
            token: "s3cret".into(),
        })
        .unwrap()
    }

    pub async fn ok_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&server)
            .await;
        server
    }

    pub async fn received_paths(server: &MockServer) -> Vec<String> {
        let mut paths = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.url.path().to_owned())
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }
}

#[test]
fn zero_workers_is_configuration_error() {
    let err = Dispatcher::new(Recording::default(), 0).err().unwrap();

    assert!(err.is_configuration());
    assert!(err.to_string().contains("positive number of worker"));
}

#[test_case(1, 1)]
#[test_case(4, 4)]
#[test_case(1024, 1024)]
#[test_case(1025, 1024; "just over the cap")]
#[test_case(usize::MAX, 1024; "absurd worker count")]
fn queue_capacity_is_capped(workers: usize, expected: usize) {
    assert_eq!(queue_capacity(workers), expected);
}

#[test_case(1)]
#[test_case(2)]
#[test_case(3)]
#[test_case(8)]
#[test_case(64; "more workers than devices")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_device_attempted_exactly_once(workers: usize) {
    let ids = macs(40);

    let (result, mut calls) =
        dispatch_recording(Recording::default(), workers, &batch_csv(&ids)).await;

    calls.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(calls, expected);

    let summary = result.unwrap();
    assert_eq!(summary.attempted, 40);
    assert_eq!(summary.succeeded, 40);
    assert_eq!(summary.failed(), 0);
}

#[tokio::test]
async fn empty_batch_finishes() {
    let (result, calls) = dispatch_recording(Recording::default(), 4, "mac_addresses\n").await;

    assert!(calls.is_empty());
    assert_eq!(result.unwrap(), BatchSummary::default());
}

#[tokio::test]
async fn invalid_rows_are_never_dispatched() {
    let (result, mut calls) = dispatch_recording(
        Recording::default(),
        2,
        "mac_addresses\naa:bb:cc:dd:ee:ff\n192.168.0.1\nnot-a-mac\n12:34:56:78:9a:bc\n",
    )
    .await;

    calls.sort();
    assert_eq!(calls, vec!["12:34:56:78:9a:bc", "aa:bb:cc:dd:ee:ff"]);
    let summary = result.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.skipped, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_do_not_stop_the_batch() {
    let ids = macs(10);
    let updater = Recording::failing(&[ids[0].as_str(), ids[5].as_str()]);

    let (result, calls) = dispatch_recording(updater, 3, &batch_csv(&ids)).await;

    assert_eq!(calls.len(), 10);
    let summary = result.unwrap();
    assert_eq!(summary.succeeded, 8);
    assert_eq!(summary.transport_errors, 2);
    assert_eq!(summary.failed(), 2);
}

#[tokio::test]
async fn structural_error_is_fatal_after_draining() {
    let (result, calls) = dispatch_recording(
        Recording::default(),
        1,
        "mac_addresses,site\naa:bb:cc:dd:ee:ff,a\n12:34:56:78:9a:bc\nee:ee:ee:ee:ee:ee,c\n",
    )
    .await;

    assert_eq!(calls, vec!["aa:bb:cc:dd:ee:ff"]);
    assert!(matches!(result, Err(BatchError::Input { row: 2, .. })));
}

/// Only finishes if both workers are inside `update` at the same time.
struct Rendezvous(Barrier);

#[async_trait]
impl Updater for Rendezvous {
    async fn update(&self, _device: &DeviceId, _payload: &UpdatePayload) -> UpdateOutcome {
        self.0.wait().await;
        UpdateOutcome::Success
    }
}

#[tokio::test]
async fn workers_run_concurrently() {
    let dispatcher = Dispatcher::new(Rendezvous(Barrier::new(2)), 2).unwrap();

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        dispatcher.run(reader(&batch_csv(&macs(4))), empty_payload()),
    )
    .await
    .expect("workers did not overlap")
    .unwrap();

    assert_eq!(summary.succeeded, 4);
}

struct PanicsOn(String, StdMutex<Vec<String>>);

#[async_trait]
impl Updater for PanicsOn {
    async fn update(&self, device: &DeviceId, _payload: &UpdatePayload) -> UpdateOutcome {
        if device.as_str() == self.0 {
            panic!("boom");
        }
        self.1.lock().unwrap().push(device.to_string());
        UpdateOutcome::Success
    }
}

#[tokio::test]
async fn panicking_worker_is_reported_after_others_finish() {
    let ids = macs(6);
    let dispatcher =
        Dispatcher::new(PanicsOn(ids[1].clone(), StdMutex::default()), 2).unwrap();

    let result = dispatcher.run(reader(&batch_csv(&ids)), empty_payload()).await;

    assert!(matches!(result, Err(BatchError::Worker(_))));
    assert_eq!(dispatcher.updater.1.lock().unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_batch_reaches_every_device() {
    let server = ok_server().await;
    let dispatcher = Dispatcher::new(client_for(&server), 2).unwrap();

    let summary = dispatcher
        .run(
            reader("mac_addresses\naa:bb:cc:dd:ee:ff\nee:ee:ee:ee:ee:ee\n12:34:56:78:9a:bc"),
            empty_payload(),
        )
        .await
        .unwrap();

    assert_eq!(
        received_paths(&server).await,
        vec![
            "/profiles/clientId:12:34:56:78:9a:bc",
            "/profiles/clientId:aa:bb:cc:dd:ee:ff",
            "/profiles/clientId:ee:ee:ee:ee:ee:ee",
        ]
    );
    assert_eq!(summary.succeeded, 3);
}

#[tokio::test]
async fn http_batch_skips_malformed_row() {
    let server = ok_server().await;
    let dispatcher = Dispatcher::new(client_for(&server), 1).unwrap();

    let summary = dispatcher
        .run(
            reader("mac_addresses\naa:bb:cc:dd:ee:ff\n192.168.0.1\n12:34:56:78:9a:bc\n"),
            empty_payload(),
        )
        .await
        .unwrap();

    assert_eq!(
        received_paths(&server).await,
        vec![
            "/profiles/clientId:12:34:56:78:9a:bc",
            "/profiles/clientId:aa:bb:cc:dd:ee:ff",
        ]
    );
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn http_rejections_are_counted() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"{"statusCode":401,"error":"Unauthorized","message":"invalid clientId or token supplied"}"#,
            "application/json",
        ))
        .expect(2)
        .mount(&server)
        .await;
    let dispatcher = Dispatcher::new(client_for(&server), 2).unwrap();

    let summary = dispatcher
        .run(
            reader("mac_addresses\naa:bb:cc:dd:ee:ff\n12:34:56:78:9a:bc\n"),
            empty_payload(),
        )
        .await
        .unwrap();

    assert_eq!(summary.api_errors, 2);
    assert_eq!(summary.succeeded, 0);
}
