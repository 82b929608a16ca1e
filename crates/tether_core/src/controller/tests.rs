use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use super::*;
use crate::error::SourceError;
use crate::error::ErrorKind;
use crate::source::{FnSource, MemorySource};
use crate::strategy::OneShotRefresh;
use crate::test_helpers::callbacks::RecordingCallback;
use crate::test_helpers::items::DataItem;
use crate::test_helpers::sources::GatedSource;
use crate::types::{Response, SourceType};

fn andrew() -> DataItem {
    DataItem::new("Andrew", "Test")
}

fn controller_over(gated: &GatedSource<DataItem>) -> DataController<DataItem> {
    let gated = gated.clone();
    DataController::builder("item")
        .source_factory(move || Source::new(gated.clone()))
        .empty_when(DataItem::has_no_payload)
        .build()
        .unwrap()
}

fn recorder(controller: &DataController<DataItem>) -> Arc<RecordingCallback<DataItem>> {
    let recorder = Arc::new(RecordingCallback::default());
    controller.register_for_callbacks(recorder.clone());
    recorder
}

#[test]
fn build_requires_a_source_factory() {
    let err = DataController::<DataItem>::builder("orphan").build().unwrap_err();
    match err {
        CoreError::ControllerConfig { name, cause } => {
            assert_eq!(name, "orphan");
            assert!(matches!(cause, ConfigError::MissingField(ref f) if f == "source_factory"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn with_config_applies_name_strategy_and_params() {
    let config = ControllerConfig::from_toml_str(
        "name = \"feed\"\n[refresh]\ntype = \"one_shot\"\n[params]\nindex = 2\n",
    )
    .unwrap();

    let controller = DataController::<DataItem>::builder("placeholder")
        .source_factory(|| Source::new(MemorySource::new()))
        .with_config(&config)
        .build()
        .unwrap();

    assert_eq!(controller.name(), "feed");
    assert_eq!(controller.source_params().index, 2);
    assert!(controller.refresh_strategy().is_some());
    assert_eq!(controller.state(), State::None);
}

#[tokio::test]
async fn source_decline_restores_previous_state() {
    let gated = GatedSource::closed(SourceType::Network, Ok(Response::new(andrew(), SourceType::Network)));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    // Occupy the controller's source from outside
    let held = controller.data_source().get(SourceParams::default()).unwrap();

    assert!(controller.request_data_async().is_none());
    assert_eq!(controller.state(), State::None);
    assert_eq!(calls.start_loading_count(), 1);

    gated.release(1);
    held.await.unwrap().unwrap();
    assert_eq!(controller.state(), State::None);
}

#[tokio::test]
async fn declined_strategy_leaves_state_untouched() {
    let gated = GatedSource::ok(SourceType::Network, andrew());
    let controller = controller_over(&gated);
    let calls = recorder(&controller);
    controller.set_refresh_strategy(Some(Arc::new(OneShotRefresh::new())));

    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);

    assert!(controller.request_data_async().is_none());
    assert_eq!(controller.state(), State::Success);
    assert_eq!(calls.start_loading_count(), 1);
    assert_eq!(gated.calls(), 1);

    controller.set_refresh_strategy(None);
    assert!(controller.request_data_async().is_some());
}

#[tokio::test]
async fn force_fetch_bypasses_state_and_strategy() {
    let gated = GatedSource::ok(SourceType::Network, andrew());
    let controller = controller_over(&gated);
    let calls = recorder(&controller);
    controller.set_refresh_strategy(Some(Arc::new(OneShotRefresh::new())));

    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert!(controller.request_data_async().is_none());

    controller.request_data_force().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);
    assert_eq!(calls.start_loading_count(), 2);
    assert_eq!(calls.success_count(), 2);
    assert_eq!(gated.calls(), 2);
}

#[tokio::test]
async fn force_fetch_still_respects_busy_source() {
    let gated = GatedSource::closed(SourceType::Network, Ok(Response::new(andrew(), SourceType::Network)));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    let first = controller.request_data_async().unwrap();
    assert!(controller.request_data_force().is_none());
    assert_eq!(controller.state(), State::Loading);
    assert_eq!(calls.start_loading_count(), 1);

    gated.release(1);
    first.await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);
    assert_eq!(gated.calls(), 1);
}

#[tokio::test]
#[traced_test]
async fn cancelled_fetch_is_never_delivered() {
    let gated = GatedSource::closed(SourceType::Network, Ok(Response::new(andrew(), SourceType::Network)));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    let handle = controller.request_data_async().unwrap();
    gated.wait_for_in_flight().await;
    controller.cancel();

    assert_eq!(controller.state(), State::None);
    assert!(handle.await.is_none());
    gated.release(1);

    assert_eq!(calls.success_count(), 0);
    assert_eq!(controller.stored_data(), None);
    assert!(logs_contain("cancelling retrieval"));
}

#[tokio::test]
async fn completion_from_destroyed_source_after_cancel_is_ignored() {
    let gated = GatedSource::closed(SourceType::Network, Ok(Response::new(andrew(), SourceType::Network)));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    let handle = controller.request_data_async().unwrap();
    gated.wait_for_in_flight().await;

    // The old source is no longer reachable, so cancel cannot stop it
    controller.destroy_data_fetcher();
    controller.cancel();

    gated.release(1);
    assert!(handle.await.is_some());
    assert_eq!(controller.state(), State::None);
    assert_eq!(calls.success_count(), 0);
    assert_eq!(controller.stored_data(), None);
}

#[tokio::test]
async fn destroy_data_fetcher_recreates_through_factory() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let controller = DataController::builder("counted")
        .source_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Source::new(MemorySource::with_value(andrew()))
        })
        .build()
        .unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 0);
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 1);

    controller.destroy_data_fetcher();
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn has_stored_data_ignores_empty_values() {
    let gated = GatedSource::ok(SourceType::Network, DataItem::blank("Andrew"));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Empty);
    assert_eq!(calls.empty_count(), 1);
    assert_eq!(calls.success_count(), 0);
    assert_eq!(controller.stored_data(), Some(DataItem::blank("Andrew")));
    assert!(!controller.has_stored_data());
}

#[tokio::test]
async fn replacing_the_store_changes_what_is_served() {
    let gated = GatedSource::ok(SourceType::Network, andrew());
    let controller = controller_over(&gated);

    let shared = Arc::new(MemoryDataStore::with_value(DataItem::new("Andrew", "Cached")));
    controller.set_data_store(shared.clone());
    assert_eq!(controller.request_data(), Some(DataItem::new("Andrew", "Cached")));

    // Wait for the refresh the request triggered to land in the new store
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while controller.state() != State::Success {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(shared.get(), Some(andrew()));
}

#[tokio::test]
async fn failure_is_reported_and_recoverable() {
    let gated = GatedSource::ok(SourceType::Network, andrew());
    gated.set_result(Err(SourceError::network("http://example.test/item", Some(503), "down")));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    controller.request_data_async().unwrap().await.unwrap().unwrap_err();
    assert_eq!(controller.state(), State::Failure);
    assert_eq!(calls.failure_count(), 1);

    gated.set_result(Ok(Response::new(andrew(), SourceType::Network)));
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);
    assert_eq!(calls.success_count(), 1);
}

#[tokio::test]
async fn source_params_reach_the_source() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let record = seen.clone();
    let controller = DataController::builder("params")
        .source_factory(move || {
            let record = record.clone();
            Source::new(FnSource::new(SourceType::Network, move |params: SourceParams| {
                record.lock().push(params.index);
                async move { Ok(Response::new(andrew(), SourceType::Network)) }
            }))
        })
        .params(SourceParams::new().with_index(4))
        .build()
        .unwrap();

    controller.request_data_async().unwrap().await.unwrap().unwrap();
    controller.set_source_params(SourceParams::new().with_index(7));
    controller.request_data_async().unwrap().await.unwrap().unwrap();

    assert_eq!(*seen.lock(), vec![4, 7]);
}

#[tokio::test]
async fn close_drops_value_and_notifies_once() {
    let gated = GatedSource::ok(SourceType::Network, andrew());
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(calls.last_success(), Some((andrew(), None)));

    controller.close();
    assert_eq!(controller.state(), State::None);
    assert_eq!(controller.stored_data(), None);
    assert_eq!(calls.closed_count(), 1);

    // Closed controllers can be reused
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);
}

#[tokio::test]
async fn cancelling_the_returned_handle_unblocks_the_controller() {
    let gated = GatedSource::closed(SourceType::Network, Ok(Response::new(andrew(), SourceType::Network)));
    let controller = controller_over(&gated);
    let calls = recorder(&controller);

    let handle = controller.request_data_async().unwrap();
    gated.wait_for_in_flight().await;
    handle.cancel();

    assert!(handle.await.is_none());
    assert_eq!(controller.state(), State::None);
    assert!(!controller.data_source().is_busy());
    assert_eq!(calls.failure_count(), 0);

    gated.release(1);
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);
    assert_eq!(calls.success_count(), 1);
}

#[tokio::test]
async fn cancelling_the_source_directly_unblocks_the_controller() {
    let gated = GatedSource::closed(SourceType::Network, Ok(Response::new(andrew(), SourceType::Network)));
    let controller = controller_over(&gated);

    let handle = controller.request_data_async().unwrap();
    gated.wait_for_in_flight().await;
    controller.data_source().cancel();

    assert!(handle.await.is_none());
    assert_eq!(controller.state(), State::None);
    assert!(controller.request_data_async().is_some());
    assert_eq!(controller.state(), State::Loading);
}

async fn explode(_params: SourceParams) -> FetchResult<DataItem> {
    panic!("remote adapter bug")
}

#[tokio::test]
async fn panicking_source_is_reported_as_failure() {
    let controller = DataController::builder("panicky")
        .source_factory(|| Source::new(FnSource::new(SourceType::Network, explode)))
        .build()
        .unwrap();
    let calls = recorder(&controller);

    let err = controller
        .request_data_async()
        .unwrap()
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(controller.state(), State::Failure);
    assert_eq!(calls.failure_count(), 1);
    assert!(!controller.data_source().is_busy());
}

#[tokio::test]
async fn panicking_emptiness_check_is_reported_as_failure() {
    let gated = GatedSource::ok(SourceType::Network, andrew());
    let controller = DataController::builder("fragile")
        .source_factory(move || Source::new(gated.clone()))
        .empty_when(|_: &DataItem| panic!("predicate bug"))
        .build()
        .unwrap();
    let calls = recorder(&controller);

    // The source itself succeeded; the controller could not apply the value
    controller.request_data_async().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Failure);
    assert_eq!(calls.failure_count(), 1);
    assert_eq!(calls.success_count(), 0);
    assert_eq!(controller.stored_data(), None);
    assert!(controller.request_data_async().is_some());
}

#[tokio::test]
async fn fresher_fetch_wins_after_source_is_replaced() {
    let stale = GatedSource::closed(
        SourceType::Network,
        Ok(Response::new(DataItem::new("Andrew", "Stale"), SourceType::Network)),
    );
    let fresh = GatedSource::ok(SourceType::Network, DataItem::new("Andrew", "Fresh"));
    let built = Arc::new(AtomicUsize::new(0));

    let (first, second, counter) = (stale.clone(), fresh.clone(), built.clone());
    let controller = DataController::builder("swapped")
        .source_factory(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Source::new(first.clone())
            } else {
                Source::new(second.clone())
            }
        })
        .build()
        .unwrap();
    let calls = recorder(&controller);

    let old = controller.request_data_async().unwrap();
    stale.wait_for_in_flight().await;

    controller.destroy_data_fetcher();
    controller.request_data_force().unwrap().await.unwrap().unwrap();
    assert_eq!(controller.state(), State::Success);

    // The old source finishing later must not overwrite the fresher value
    stale.release(1);
    assert!(old.await.is_some());
    assert_eq!(controller.stored_data(), Some(DataItem::new("Andrew", "Fresh")));
    assert_eq!(calls.success_count(), 1);
    assert_eq!(calls.start_loading_count(), 1);
}

