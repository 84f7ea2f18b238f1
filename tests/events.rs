//! Event routing: junction-box reachability across the parent chain, bolt
//! notification, exception filtering, and the global introspection channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wirekit::{
    AutowiringEvents, Bolt, Context, ExceptionFilter, Member, PacketFactory, ShutdownMode, Sigil,
};

trait TickEvent: Send + Sync {
    fn tick(&self, n: u32) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Recorder {
    ticks: Mutex<Vec<u32>>,
}

impl Recorder {
    fn seen(&self) -> Vec<u32> {
        self.ticks.lock().unwrap().clone()
    }
}

impl TickEvent for Recorder {
    fn tick(&self, n: u32) -> anyhow::Result<()> {
        self.ticks.lock().unwrap().push(n);
        Ok(())
    }
}

fn recorder_member(obj: &Arc<Recorder>) -> Member {
    Member::new(obj.clone()).with_receiver::<dyn TickEvent>(obj.clone())
}

#[test]
fn delivery_waits_for_initiation() {
    struct S;
    let ctx = Context::global().create::<S>();
    let recorder = Arc::new(Recorder::default());
    ctx.add(recorder_member(&recorder)).unwrap();

    ctx.fire::<dyn TickEvent>(|r| r.tick(1));
    assert!(recorder.seen().is_empty());

    ctx.initiate();
    ctx.fire::<dyn TickEvent>(|r| r.tick(2));
    assert_eq!(recorder.seen(), vec![2]);
}

#[test]
fn parent_fire_reaches_initiated_descendants() {
    struct P;
    struct C;
    let parent = Context::global().create::<P>();
    let child = parent.create::<C>();

    let recorder = Arc::new(Recorder::default());
    child.add(recorder_member(&recorder)).unwrap();
    child.initiate();

    parent.fire::<dyn TickEvent>(|r| r.tick(3));
    assert_eq!(recorder.seen(), vec![3]);
}

#[test]
fn child_fire_does_not_reach_parent_receivers() {
    struct P;
    struct C;
    let parent = Context::global().create::<P>();
    let child = parent.create::<C>();

    let recorder = Arc::new(Recorder::default());
    parent.add(recorder_member(&recorder)).unwrap();
    parent.initiate();
    child.initiate();

    child.fire::<dyn TickEvent>(|r| r.tick(4));
    assert!(recorder.seen().is_empty());

    parent.fire::<dyn TickEvent>(|r| r.tick(5));
    assert_eq!(recorder.seen(), vec![5]);
}

#[test]
fn shutdown_withdraws_receivers_from_ancestors() {
    struct P;
    struct C;
    let parent = Context::global().create::<P>();
    let child = parent.create::<C>();

    let recorder = Arc::new(Recorder::default());
    child.add(recorder_member(&recorder)).unwrap();
    child.initiate();
    parent.initiate();

    child.signal_shutdown(true, ShutdownMode::Graceful);
    parent.fire::<dyn TickEvent>(|r| r.tick(6));
    child.fire::<dyn TickEvent>(|r| r.tick(7));
    assert!(recorder.seen().is_empty());
}

#[test]
fn receivers_added_after_shutdown_are_never_installed() {
    struct S;
    let ctx = Context::global().create::<S>();
    ctx.initiate();
    ctx.signal_shutdown(true, ShutdownMode::Graceful);

    let recorder = Arc::new(Recorder::default());
    ctx.add(recorder_member(&recorder)).unwrap();
    ctx.fire::<dyn TickEvent>(|r| r.tick(8));
    assert!(recorder.seen().is_empty());
}

#[test]
fn peers_share_event_channels() {
    struct P;
    struct Q;
    struct Host;
    let host = Context::global().create::<Host>();
    let a = host.create::<P>();
    let b = a.create_peer::<Q>();

    let recorder = Arc::new(Recorder::default());
    a.add(recorder_member(&recorder)).unwrap();
    a.initiate();

    // The peer shares the junction-box manager, so its fire reaches
    // receivers registered in the sibling.
    b.fire::<dyn TickEvent>(|r| r.tick(9));
    assert_eq!(recorder.seen(), vec![9]);
}

#[test]
fn snooped_receivers_hear_and_can_withdraw() {
    struct S;
    let ctx = Context::global().create::<S>();
    ctx.initiate();

    let recorder = Arc::new(Recorder::default());
    let member = recorder_member(&recorder);
    ctx.snoop(&member);
    ctx.fire::<dyn TickEvent>(|r| r.tick(10));
    assert_eq!(recorder.seen(), vec![10]);

    ctx.unsnoop(&member);
    ctx.fire::<dyn TickEvent>(|r| r.tick(11));
    assert_eq!(recorder.seen(), vec![10]);
}

struct CountingBolt {
    sigils: Vec<Sigil>,
    count: AtomicUsize,
}

impl CountingBolt {
    fn new(sigils: Vec<Sigil>) -> Arc<Self> {
        Arc::new(Self {
            sigils,
            count: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Bolt for CountingBolt {
    fn context_sigils(&self) -> Vec<Sigil> {
        self.sigils.clone()
    }

    fn context_created(&self, _child: &Arc<Context>) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn bolts_notified_for_matching_sigil_only() {
    struct Host;
    struct Tau;
    struct Sigma;
    let host = Context::global().create::<Host>();

    let bolt = CountingBolt::new(vec![Sigil::of::<Tau>()]);
    host.add(Member::new(bolt.clone()).with_bolt(bolt.clone()))
        .unwrap();

    let _c = host.create::<Tau>();
    assert_eq!(bolt.count(), 1);

    let _c2 = host.create::<Sigma>();
    assert_eq!(bolt.count(), 1);
}

#[test]
fn anonymous_bolt_sees_every_creation_once() {
    struct Host;
    struct Tau;
    let host = Context::global().create::<Host>();

    let bolt = CountingBolt::new(Vec::new());
    host.add(Member::new(bolt.clone()).with_bolt(bolt.clone()))
        .unwrap();

    let _c = host.create::<Tau>();
    assert_eq!(bolt.count(), 1);

    // An anonymous child creation must not double-notify.
    let _c2 = host.create::<()>();
    assert_eq!(bolt.count(), 2);
}

#[test]
fn bolts_hear_descendant_creations() {
    struct Host;
    struct Mid;
    struct Tau;
    let host = Context::global().create::<Host>();
    let mid = host.create::<Mid>();

    let bolt = CountingBolt::new(vec![Sigil::of::<Tau>()]);
    host.add(Member::new(bolt.clone()).with_bolt(bolt.clone()))
        .unwrap();

    // Creation notices recurse to ancestor bolt registrations.
    let _c = mid.create::<Tau>();
    assert_eq!(bolt.count(), 1);
}

struct CountingFilter {
    handles: bool,
    seen: AtomicUsize,
}

impl CountingFilter {
    fn new(handles: bool) -> Arc<Self> {
        Arc::new(Self {
            handles,
            seen: AtomicUsize::new(0),
        })
    }

    fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

impl ExceptionFilter for CountingFilter {
    fn filter(&self, _err: &anyhow::Error) -> bool {
        self.seen.fetch_add(1, Ordering::SeqCst);
        self.handles
    }
}

#[test]
fn firing_errors_filtered_up_the_chain() {
    struct P;
    struct C;
    let parent = Context::global().create::<P>();
    let child = parent.create::<C>();

    // Child filter rethrows, parent filter absorbs.
    let child_filter = CountingFilter::new(false);
    child
        .add(Member::new(child_filter.clone()).with_filter(child_filter.clone()))
        .unwrap();
    let parent_filter = CountingFilter::new(true);
    parent
        .add(Member::new(parent_filter.clone()).with_filter(parent_filter.clone()))
        .unwrap();

    struct FailingReceiver;
    impl TickEvent for FailingReceiver {
        fn tick(&self, _n: u32) -> anyhow::Result<()> {
            anyhow::bail!("receiver exploded")
        }
    }
    let failing = Arc::new(FailingReceiver);
    child
        .add(Member::new(failing.clone()).with_receiver::<dyn TickEvent>(failing.clone()))
        .unwrap();
    child.initiate();

    // No error escapes the firing site.
    child.fire::<dyn TickEvent>(|r| r.tick(1));
    assert_eq!(child_filter.seen(), 1);
    assert_eq!(parent_filter.seen(), 1);
}

#[test]
fn unhandled_free_standing_error_is_returned() {
    struct P;
    struct C;
    let parent = Context::global().create::<P>();
    let child = parent.create::<C>();

    let err = child.route_exception(anyhow::anyhow!("nobody home"));
    assert!(matches!(
        err,
        Err(wirekit::ContextError::Unhandled(_))
    ));

    // A swallowing ancestor makes the same call succeed.
    let filter = CountingFilter::new(true);
    parent
        .add(Member::new(filter.clone()).with_filter(filter.clone()))
        .unwrap();
    child
        .route_exception(anyhow::anyhow!("handled upstairs"))
        .unwrap();
    assert_eq!(filter.seen(), 1);
}

struct IntrospectionWatcher {
    sigil_marker: &'static str,
    object_marker: &'static str,
    objects: AtomicUsize,
    contexts: AtomicUsize,
}

impl AutowiringEvents for IntrospectionWatcher {
    fn new_context(&self, context: &Arc<Context>) {
        if context.sigil().name().contains(self.sigil_marker) {
            self.contexts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn new_object(&self, _context: &Arc<Context>, object: &wirekit::AnyHandle) {
        if object.type_name().contains(self.object_marker) {
            self.objects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn introspection_events_fire_on_the_global_channel() {
    struct WatchedSigilMarker;
    struct WatchedObjectMarker;

    let global = Context::global();
    global.initiate();

    let watcher = Arc::new(IntrospectionWatcher {
        sigil_marker: "WatchedSigilMarker",
        object_marker: "WatchedObjectMarker",
        objects: AtomicUsize::new(0),
        contexts: AtomicUsize::new(0),
    });
    global
        .add(Member::new(watcher.clone()).with_receiver::<dyn AutowiringEvents>(watcher.clone()))
        .unwrap();

    let ctx = global.create::<WatchedSigilMarker>();
    assert_eq!(watcher.contexts.load(Ordering::SeqCst), 1);

    ctx.add(Member::new(Arc::new(WatchedObjectMarker))).unwrap();
    assert_eq!(watcher.objects.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct StubFactory {
    subs: Mutex<Vec<wirekit::PacketSubscriber>>,
}

impl wirekit::PacketFactory for StubFactory {
    fn add_subscriber(&self, subscriber: wirekit::PacketSubscriber) {
        self.subs.lock().unwrap().push(subscriber);
    }

    fn remove_subscriber(&self, object: wirekit::ObjectId) {
        self.subs.lock().unwrap().retain(|s| s.object_id() != object);
    }

    fn subscribers(&self) -> Vec<wirekit::PacketSubscriber> {
        self.subs.lock().unwrap().clone()
    }
}

#[test]
fn packet_subscribers_forwarded_and_withdrawn() {
    struct P;
    struct C;
    let parent = Context::global().create::<P>();
    let child = parent.create::<C>();

    let parent_factory = Arc::new(StubFactory::default());
    parent
        .add(
            Member::new(parent_factory.clone())
                .with_interface::<dyn wirekit::PacketFactory>(parent_factory.clone()),
        )
        .unwrap();
    let child_factory = Arc::new(StubFactory::default());
    child
        .add(
            Member::new(child_factory.clone())
                .with_interface::<dyn wirekit::PacketFactory>(child_factory.clone()),
        )
        .unwrap();

    struct FrameListener;
    let listener = Arc::new(FrameListener);
    let subscriber =
        wirekit::PacketSubscriber::new(wirekit::AnyHandle::new::<FrameListener>(listener.clone()));
    child
        .add(Member::new(listener.clone()).with_subscriber(subscriber))
        .unwrap();

    // Forwarded to the local factory and every ancestor factory.
    assert_eq!(child_factory.subscribers().len(), 1);
    assert_eq!(parent_factory.subscribers().len(), 1);

    // Shutdown withdraws the subscription from ancestors; the home factory
    // keeps its own record.
    child.signal_shutdown(true, ShutdownMode::Graceful);
    assert!(parent_factory.subscribers().is_empty());
    assert_eq!(child_factory.subscribers().len(), 1);
}
