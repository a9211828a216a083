//! End-to-end behavior of sessions, jobs, handlers and guards over the simulated transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use instr_runtime::protocol::{
	CompletionEvent, ErrorKind, JobStatus, LockKind, OperationKind, RouteSpec, ServiceRequest, TriggerResource,
};
use instr_runtime::{Error, GuardState, ResourceManager, RuntimeConfig, Session, SimTransport, TransportCall};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DMM: &str = "GPIB0::2::INSTR";
const SCOPE: &str = "PXI0::14::INSTR";
const WAIT: Duration = Duration::from_secs(2);

struct Bench {
	manager: Arc<ResourceManager>,
	sim: SimTransport,
	dispatch: JoinHandle<()>,
}

impl Bench {
	fn start() -> Self {
		let (sim, notifications) = SimTransport::new();
		let sim = sim.with_resource(DMM).with_resource(SCOPE);
		let (manager, dispatch) = ResourceManager::start(Arc::new(sim.clone()), notifications, RuntimeConfig::default());
		Self { manager, sim, dispatch }
	}

	fn open(&self, target: &str) -> Session {
		self.manager.open(target).expect("open session")
	}

	async fn stop(self) {
		self.manager.shutdown();
		self.dispatch.await.expect("dispatch loop panicked");
	}
}

/// Installs a handler that forwards every event into a channel.
fn record_events(session: &Session) -> mpsc::UnboundedReceiver<CompletionEvent> {
	let (tx, rx) = mpsc::unbounded_channel();
	session
		.on_completion(move |event: &CompletionEvent| {
			let _ = tx.send(event.clone());
		})
		.unwrap();
	rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<CompletionEvent>) -> CompletionEvent {
	tokio::time::timeout(WAIT, rx.recv())
		.await
		.expect("timed out waiting for completion event")
		.expect("event channel closed")
}

/// Completes a job on `other` and waits for its event, proving the dispatch
/// loop has processed every notification queued before it.
async fn drain_dispatch(bench: &Bench, other: &Session) {
	let mut rx = record_events(other);
	let job = other.read_async(8).unwrap();
	bench.sim.complete(other.id(), job.id(), b"sync".to_vec());
	let event = next_event(&mut rx).await;
	assert_eq!(event.job, job.id());
	other.clear_handler();
}

#[tokio::test(start_paused = true)]
async fn test_read_reports_not_ready_then_completed() {
	let bench = Bench::start();
	bench.sim.respond_with(DMM, vec![b'x'; 37], Duration::from_millis(50));
	let session = bench.open(DMM);

	let job = session.read_async(4096).unwrap();
	let err = session.result_of(&job).unwrap_err();
	assert!(err.is_not_ready(), "expected NotReady, got {err:?}");

	let status = session.wait(&job, WAIT).await.unwrap();
	assert_eq!(status, JobStatus::Completed(37));
	assert_eq!(session.result_of(&job).unwrap(), JobStatus::Completed(37));
	assert_eq!(job.take_data().unwrap().len(), 37);
	assert_eq!(session.pending_jobs(), 0);

	bench.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_timeout_leaves_job_pending() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let job = session.read_async(64).unwrap();

	let err = session.wait(&job, Duration::from_millis(100)).await.unwrap_err();
	assert!(err.is_timeout());
	assert!(job.is_pending());
	assert_eq!(session.pending_jobs(), 1);

	bench.stop().await;
}

#[tokio::test]
async fn test_cancel_wins_over_late_completion() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let probe = bench.open(SCOPE);
	let mut events = record_events(&session);

	let job = session.read_async(4096).unwrap();
	assert!(session.cancel(&job).unwrap().was_cancelled());
	assert_eq!(session.result_of(&job).unwrap(), JobStatus::Cancelled);

	bench.sim.complete(session.id(), job.id(), vec![0u8; 37]);
	let event = next_event(&mut events).await;
	assert_eq!(event.status, JobStatus::Cancelled);

	drain_dispatch(&bench, &probe).await;
	assert_eq!(session.result_of(&job).unwrap(), JobStatus::Cancelled);
	assert!(job.take_data().is_none());
	assert!(events.try_recv().is_err(), "late completion must not reach the handler");

	let calls = bench.sim.calls();
	assert!(calls.iter().any(|call| matches!(call, TransportCall::Abort { .. })));

	bench.stop().await;
}

#[tokio::test]
async fn test_cancel_after_completion_reports_terminal_status() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let job = session.read_async(16).unwrap();

	bench.sim.complete(session.id(), job.id(), b"+1.0E+00\n".to_vec());
	assert_eq!(session.wait(&job, WAIT).await.unwrap(), JobStatus::Completed(9));

	let outcome = session.cancel(&job).unwrap();
	assert!(!outcome.was_cancelled());
	assert_eq!(session.result_of(&job).unwrap(), JobStatus::Completed(9));

	bench.stop().await;
}

#[tokio::test]
async fn test_close_cancels_every_pending_job() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let probe = bench.open(SCOPE);
	let invoked = Arc::new(AtomicUsize::new(0));
	{
		let invoked = Arc::clone(&invoked);
		session
			.on_completion(move |_: &CompletionEvent| {
				invoked.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();
	}

	let jobs: Vec<_> = (0..5).map(|_| session.read_async(256).unwrap()).collect();
	session.close();

	for job in &jobs {
		assert_eq!(job.status(), JobStatus::Cancelled);
	}
	assert_eq!(session.pending_jobs(), 0);
	assert_eq!(bench.manager.session_count(), 1);

	let calls = bench.sim.calls();
	let aborts = calls.iter().filter(|call| matches!(call, TransportCall::Abort { .. })).count();
	let close_at = calls
		.iter()
		.position(|call| matches!(call, TransportCall::CloseSession { session: id } if *id == session.id()))
		.expect("transport session closed");
	let last_abort = calls
		.iter()
		.rposition(|call| matches!(call, TransportCall::Abort { .. }))
		.expect("jobs aborted");
	assert_eq!(aborts, jobs.len());
	assert!(last_abort < close_at, "aborts must precede the transport close");

	for job in &jobs {
		bench.sim.complete(session.id(), job.id(), b"late".to_vec());
	}
	drain_dispatch(&bench, &probe).await;
	assert_eq!(invoked.load(Ordering::SeqCst), 0);

	bench.stop().await;
}

#[tokio::test]
async fn test_closed_session_rejects_new_work() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	session.close();
	session.close();

	assert!(session.read_async(16).unwrap_err().is_invalid_session());
	assert!(session.write_async(b"*RST\n".to_vec()).unwrap_err().is_invalid_session());
	assert!(session.on_completion(|_: &CompletionEvent| {}).unwrap_err().is_invalid_session());
	assert!(
		session
			.reserve_trigger(TriggerResource::new(0, 1))
			.unwrap_err()
			.is_invalid_session()
	);

	let closes = bench
		.sim
		.calls()
		.into_iter()
		.filter(|call| matches!(call, TransportCall::CloseSession { .. }))
		.count();
	assert_eq!(closes, 1);

	bench.stop().await;
}

#[tokio::test]
async fn test_handler_runs_once_off_the_caller_stack() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let mut events = record_events(&session);

	let job = session.read_async(4096).unwrap();
	bench.sim.complete(session.id(), job.id(), vec![7u8; 37]);
	// Nothing runs here until this task yields to the dispatch loop.
	assert!(events.try_recv().is_err());

	let event = next_event(&mut events).await;
	assert_eq!(event.session, session.id());
	assert_eq!(event.job, job.id());
	assert_eq!(event.kind, OperationKind::Read);
	assert_eq!(event.status, JobStatus::Completed(37));
	assert_eq!(event.byte_count, Some(37));

	bench.sim.complete(session.id(), job.id(), vec![7u8; 37]);
	let probe = bench.open(SCOPE);
	drain_dispatch(&bench, &probe).await;
	assert!(events.try_recv().is_err(), "a settled job must not be delivered twice");

	bench.stop().await;
}

#[tokio::test]
async fn test_cancel_event_is_not_delivered_inline() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let mut events = record_events(&session);

	let job = session.read_async(64).unwrap();
	session.cancel(&job).unwrap();
	assert!(events.try_recv().is_err());

	let event = next_event(&mut events).await;
	assert_eq!(event.job, job.id());
	assert_eq!(event.status, JobStatus::Cancelled);
	assert_eq!(event.byte_count, None);

	bench.stop().await;
}

#[tokio::test]
async fn test_replaced_handler_receives_later_events() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let mut first = record_events(&session);

	let job = session.read_async(8).unwrap();
	bench.sim.complete(session.id(), job.id(), b"one".to_vec());
	assert_eq!(next_event(&mut first).await.job, job.id());

	let (tx, mut second) = mpsc::unbounded_channel();
	let replaced = session
		.on_completion(move |event: &CompletionEvent| {
			let _ = tx.send(event.clone());
		})
		.unwrap();
	assert!(replaced);

	let job = session.read_async(8).unwrap();
	bench.sim.complete(session.id(), job.id(), b"two".to_vec());
	assert_eq!(next_event(&mut second).await.job, job.id());
	assert!(first.try_recv().is_err());

	bench.stop().await;
}

#[tokio::test]
async fn test_failed_read_reports_error_kind() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let job = session.read_async(64).unwrap();

	bench.sim.fail(session.id(), job.id(), ErrorKind::TransportTimeout);
	let status = session.wait(&job, WAIT).await.unwrap();
	assert_eq!(status, JobStatus::Failed(ErrorKind::TransportTimeout));
	assert!(job.take_data().is_none());

	bench.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_write_reports_bytes_written() {
	let bench = Bench::start();
	bench.sim.respond_with(DMM, Vec::new(), Duration::from_millis(5));
	let session = bench.open(DMM);

	let job = session.write_async(b"MEAS:VOLT:DC?\n".to_vec()).unwrap();
	assert_eq!(job.kind(), OperationKind::Write);
	assert_eq!(session.wait(&job, WAIT).await.unwrap(), JobStatus::Completed(14));

	bench.stop().await;
}

#[tokio::test]
async fn test_foreign_job_is_rejected() {
	let bench = Bench::start();
	let dmm = bench.open(DMM);
	let scope = bench.open(SCOPE);
	let job = dmm.read_async(8).unwrap();

	assert!(matches!(scope.cancel(&job), Err(Error::ForeignJob { .. })));
	assert!(matches!(scope.result_of(&job), Err(Error::ForeignJob { .. })));
	assert!(job.is_pending());

	bench.stop().await;
}

#[tokio::test]
async fn test_service_request_reaches_handler() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let (tx, mut rx) = mpsc::unbounded_channel();
	session
		.on_service_request(move |request: &ServiceRequest| {
			let _ = tx.send(request.status_byte);
		})
		.unwrap();

	bench.sim.raise_srq(session.id(), 0x40);
	let status_byte = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
	assert_eq!(status_byte, 0x40);

	bench.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_cancel_race_settles_once() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let mut events = record_events(&session);

	for _ in 0..200 {
		let job = session.read_async(16).unwrap();
		let sim = bench.sim.clone();
		let (session_id, job_id) = (session.id(), job.id());
		let completer = std::thread::spawn(move || sim.complete(session_id, job_id, b"race".to_vec()));
		let cancelled = session.cancel(&job).unwrap().was_cancelled();
		completer.join().unwrap();

		let status = session.wait(&job, WAIT).await.unwrap();
		let event = next_event(&mut events).await;
		assert_eq!(event.job, job.id());
		assert_eq!(event.status, status);
		if cancelled {
			assert_eq!(status, JobStatus::Cancelled);
		} else {
			assert_eq!(status, JobStatus::Completed(4));
		}
	}

	let probe = bench.open(SCOPE);
	drain_dispatch(&bench, &probe).await;
	assert!(events.try_recv().is_err(), "each job must produce exactly one event");

	bench.stop().await;
}

#[tokio::test]
async fn test_busy_trigger_reservation_releases_nothing() {
	let bench = Bench::start();
	let resource = TriggerResource::new(0, 1);
	bench.sim.set_busy(resource);
	let session = bench.open(DMM);

	let reservation = session.reserve_trigger(resource).unwrap();
	assert_eq!(reservation.state(), GuardState::AcquireFailed);
	assert!(!reservation.release());
	drop(reservation);

	assert_eq!(
		bench.sim.guard_calls(),
		vec![TransportCall::AcquireResource {
			session: session.id(),
			resource
		}]
	);

	let err = session.reserve_trigger(resource).unwrap().require().unwrap_err();
	assert!(err.is_acquire_failed());

	bench.stop().await;
}

#[tokio::test]
async fn test_reserve_route_release_call_order() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let resource = TriggerResource::new(0, 1);
	let route = RouteSpec::new(0, 1, 3);

	let reservation = session.reserve_trigger(resource).unwrap().require().unwrap();
	let mapping = session.map_trigger(route).unwrap().require().unwrap();
	assert!(bench.sim.is_reserved(&resource));
	assert!(bench.sim.is_routed(&route));

	assert!(mapping.release());
	assert!(reservation.release());
	assert!(!mapping.release());
	assert!(!reservation.release());
	drop(mapping);
	drop(reservation);

	let id = session.id();
	assert_eq!(
		bench.sim.guard_calls(),
		vec![
			TransportCall::AcquireResource { session: id, resource },
			TransportCall::MapRoute { session: id, route },
			TransportCall::UnmapRoute { session: id, route },
			TransportCall::ReleaseResource { session: id, resource },
		]
	);
	assert!(!bench.sim.is_reserved(&resource));
	assert!(!bench.sim.is_routed(&route));

	bench.stop().await;
}

#[tokio::test]
async fn test_dropped_guard_releases_once() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let resource = TriggerResource::new(2, 1);

	{
		let _reservation = session.reserve_trigger(resource).unwrap();
	}

	let releases = bench
		.sim
		.guard_calls()
		.into_iter()
		.filter(|call| matches!(call, TransportCall::ReleaseResource { .. }))
		.count();
	assert_eq!(releases, 1);

	bench.stop().await;
}

#[tokio::test]
async fn test_refused_route_leaves_reservation_intact() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let resource = TriggerResource::new(0, 1);
	let route = RouteSpec::new(0, 1, 3);
	bench.sim.refuse_route(route);

	let reservation = session.reserve_trigger(resource).unwrap();
	let mapping = session.map_trigger(route).unwrap();
	assert_eq!(mapping.state(), GuardState::AcquireFailed);
	drop(mapping);
	assert!(bench.sim.is_reserved(&resource));
	drop(reservation);

	let unmaps = bench
		.sim
		.guard_calls()
		.into_iter()
		.filter(|call| matches!(call, TransportCall::UnmapRoute { .. }))
		.count();
	assert_eq!(unmaps, 0);

	bench.stop().await;
}

#[tokio::test]
async fn test_refused_lock_issues_no_unlock() {
	let bench = Bench::start();
	let owner = bench.open(DMM);
	let other = bench.open(DMM);

	let held = owner.lock(LockKind::Exclusive).unwrap();
	assert!(held.is_acquired());

	let refused = other.lock(LockKind::Exclusive).unwrap();
	assert_eq!(refused.state(), GuardState::AcquireFailed);
	assert!(!refused.release());
	assert!(matches!(other.read_async(8), Err(Error::ResourceLocked(_))));

	drop(held);
	assert!(other.read_async(8).is_ok());

	let unlocks: Vec<_> = bench
		.sim
		.guard_calls()
		.into_iter()
		.filter(|call| matches!(call, TransportCall::Unlock { .. }))
		.collect();
	assert_eq!(unlocks, vec![TransportCall::Unlock { session: owner.id() }]);

	bench.stop().await;
}

#[tokio::test]
async fn test_guard_outliving_session_skips_release() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	let resource = TriggerResource::new(3, 1);

	let reservation = session.reserve_trigger(resource).unwrap();
	session.close();
	assert!(!bench.sim.is_reserved(&resource));

	assert!(!reservation.release());
	assert_eq!(reservation.state(), GuardState::Released);

	let releases = bench
		.sim
		.guard_calls()
		.into_iter()
		.filter(|call| matches!(call, TransportCall::ReleaseResource { .. }))
		.count();
	assert_eq!(releases, 0);

	bench.stop().await;
}

#[tokio::test]
async fn test_route_returned_with_closed_session() {
	let bench = Bench::start();
	let first = bench.open(SCOPE);
	let route = RouteSpec::new(0, 1, 3);

	let mapping = first.map_trigger(route).unwrap();
	assert_eq!(mapping.state(), GuardState::Acquired);
	first.close();
	drop(mapping);
	assert!(!bench.sim.is_routed(&route));

	let second = bench.open(SCOPE);
	let remapped = second.map_trigger(route).unwrap();
	assert_eq!(remapped.state(), GuardState::Acquired);
	assert!(remapped.release());
	assert!(!bench.sim.is_routed(&route));

	let unmaps = bench
		.sim
		.guard_calls()
		.into_iter()
		.filter(|call| matches!(call, TransportCall::UnmapRoute { .. }))
		.count();
	assert_eq!(unmaps, 1);

	bench.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_racing_completions_cancels_pending_jobs() {
	let bench = Bench::start();
	for _ in 0..100 {
		let session = bench.open(DMM);
		let jobs: Vec<_> = (0..4).map(|_| session.read_async(16).unwrap()).collect();

		let sim = bench.sim.clone();
		let id = session.id();
		let ids: Vec<_> = jobs.iter().map(|job| job.id()).collect();
		let completer = std::thread::spawn(move || {
			for job in ids {
				sim.complete(id, job, b"late".to_vec());
			}
		});
		session.close();
		completer.join().unwrap();

		// Whatever settled first, every job is terminal once close returns.
		for job in &jobs {
			let status = job.result().unwrap();
			assert!(matches!(status, JobStatus::Cancelled | JobStatus::Completed(4)), "{status:?}");
		}
		assert_eq!(session.pending_jobs(), 0);
	}
	bench.stop().await;
}

#[tokio::test]
async fn test_begin_refused_by_transport() {
	let bench = Bench::start();
	let session = bench.open(DMM);
	bench.sim.fault(DMM);

	let err = session.read_async(8).unwrap_err();
	assert!(matches!(err, Error::TransportError(_)), "{err:?}");
	assert_eq!(session.pending_jobs(), 0);

	bench.stop().await;
}
