use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use trellis::graph::leaf::Leaf;
use trellis::graph::meta::{Device, DeviceError};
use trellis::graph::node::NodePtr;
use trellis::ops::functional as f;
use trellis::session::{Session, SessionError};
use trellis::tensor::Shape;
use trellis_ref_cpu::CpuDevice;

/// Wraps the reference device and counts how many functors it recomputes.
struct CountingDevice {
    inner: CpuDevice,
    calcs: AtomicUsize,
}

impl CountingDevice {
    fn new() -> Self {
        CountingDevice {
            inner: CpuDevice::new(),
            calcs: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calcs.load(Ordering::SeqCst)
    }
}

impl Device for CountingDevice {
    fn calc(&self, func: &trellis::Functor) -> Result<(), DeviceError> {
        self.calcs.fetch_add(1, Ordering::SeqCst);
        self.inner.calc(func)
    }
}

fn scalar_var(label: &str, value: f32) -> Result<NodePtr> {
    let leaf: NodePtr = Leaf::variable(label, Shape::new(&[1])?, vec![value])?;
    Ok(leaf)
}

fn first(node: &NodePtr) -> f32 {
    node.value().expect("buffer should be materialized")[0]
}

#[test]
fn tracking_twice_does_not_duplicate_ops() -> Result<()> {
    let a = scalar_var("a", 0.0)?;
    let b = scalar_var("b", 0.0)?;
    let c = scalar_var("c", 0.0)?;
    let d = scalar_var("d", 0.0)?;

    let x = f::add(&a, &b)?;
    let target = f::mul(&x, &c)?;
    let target2 = f::mul(&x, &d)?;

    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    assert_eq!(session.tracked().len(), 1);
    assert_eq!(session.n_ops(), 2);

    session.track(std::slice::from_ref(&target2));
    assert_eq!(session.tracked().len(), 2);
    assert_eq!(session.n_ops(), 3);

    // re-tracking an existing root changes nothing
    session.track(std::slice::from_ref(&target));
    assert_eq!(session.tracked().len(), 2);
    assert_eq!(session.n_ops(), 3);
    Ok(())
}

#[test]
fn update_computes_bottom_up() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 1.0)?;
    let c = scalar_var("c", 2.0)?;

    let x = f::add(&a, &b)?;
    let target = f::mul(&x, &c)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;

    assert_eq!(first(&x), 2.0);
    assert_eq!(first(&target), 4.0);
    assert_eq!(device.calls(), 2);
    Ok(())
}

#[test]
fn update_without_changes_is_a_noop() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 2.0)?;
    let target = f::add(&a, &b)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;
    assert_eq!(device.calls(), 1);

    session.update(&device)?;
    session.update(&device)?;
    assert_eq!(device.calls(), 1, "nothing changed, nothing recomputes");
    Ok(())
}

#[test]
fn assigning_identical_data_still_invalidates() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 2.0)?;
    let target = f::add(&a, &b)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;
    assert_eq!(device.calls(), 1);

    a.as_leaf().unwrap().assign(&[1.0])?;
    session.update(&device)?;
    assert_eq!(device.calls(), 2, "the version bump is unconditional");
    Ok(())
}

#[test]
fn targeted_update_leaves_downstream_stale() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 1.0)?;
    let c = scalar_var("c", 2.0)?;

    let x = f::add(&a, &b)?;
    let target = f::mul(&x, &c)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;
    assert_eq!(first(&target), 4.0);

    a.as_leaf().unwrap().assign(&[2.0])?;
    session.update_target(&device, std::slice::from_ref(&x))?;
    assert_eq!(first(&x), 3.0, "the target itself refreshes");
    assert_eq!(first(&target), 4.0, "downstream keeps its old buffer");

    session.update(&device)?;
    assert_eq!(first(&target), 6.0);
    Ok(())
}

#[test]
fn targeted_update_touches_only_needed_ancestors() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 1.0)?;
    let c = scalar_var("c", 2.0)?;

    let x = f::add(&a, &b)?;
    let target = f::mul(&x, &c)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;
    let after_full = device.calls();

    a.as_leaf().unwrap().assign(&[5.0])?;
    session.update_target(&device, std::slice::from_ref(&x))?;
    assert_eq!(device.calls(), after_full + 1, "only x recomputes");
    Ok(())
}

#[test]
fn ignored_subtrees_act_as_barriers() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 1.0)?;
    let c = scalar_var("c", 3.0)?;

    let x = f::add(&a, &b)?; // 2
    let y = f::mul(&x, &c)?; // 6

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&y));
    session.update(&device)?;
    assert_eq!(first(&y), 6.0);

    // both inputs change, but x is pinned by the ignore set
    a.as_leaf().unwrap().assign(&[5.0])?;
    c.as_leaf().unwrap().assign(&[4.0])?;
    session.update_target_ignoring(&device, std::slice::from_ref(&y), std::slice::from_ref(&x))?;
    assert_eq!(first(&x), 2.0, "ignored subtree is never entered");
    assert_eq!(first(&y), 8.0, "y refreshes against the stale x");

    // a newer assignment lifts the whole chain past the pinned state
    a.as_leaf().unwrap().assign(&[7.0])?;
    session.update(&device)?;
    assert_eq!(first(&x), 8.0);
    assert_eq!(first(&y), 32.0);
    Ok(())
}

#[test]
fn untracked_targets_are_an_error() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 1.0)?;
    let tracked = f::add(&a, &b)?;
    let stranger = f::mul(&a, &b)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&tracked));

    let err = session
        .update_target(&device, std::slice::from_ref(&stranger))
        .unwrap_err();
    assert!(matches!(err, SessionError::UntrackedTarget { .. }));
    Ok(())
}

#[test]
fn clear_resets_bookkeeping_without_touching_tensors() -> Result<()> {
    let a = scalar_var("a", 1.0)?;
    let b = scalar_var("b", 1.0)?;
    let target = f::add(&a, &b)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;
    assert_eq!(first(&target), 2.0);

    session.clear();
    assert!(session.tracked().is_empty());
    assert_eq!(session.n_ops(), 0);

    session.update(&device)?;
    assert_eq!(device.calls(), 1, "a cleared session schedules nothing");
    assert_eq!(first(&target), 2.0, "the shared tensor kept its buffer");
    Ok(())
}

#[test]
fn shared_descendants_recompute_once() -> Result<()> {
    let a = scalar_var("a", 2.0)?;
    let b = scalar_var("b", 3.0)?;
    let c = scalar_var("c", 12.0)?;

    let u = f::neg(&a)?; // -2
    let x = f::mul(&u, &b)?; // -6
    let y = f::div(&c, &u)?; // -6
    let target = f::add(&y, &x)?; // -12

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&target));
    session.update(&device)?;
    assert_eq!(first(&target), -12.0);
    assert_eq!(device.calls(), 4, "u evaluates once despite two parents");
    Ok(())
}

#[test]
fn lazy_initialization_walks_dependencies() -> Result<()> {
    let a = scalar_var("a", 2.0)?;
    let b = scalar_var("b", 3.0)?;
    let x = f::add(&a, &b)?;
    let y = f::neg(&x)?;

    let device = CpuDevice::new();
    let yf = y.as_functor().unwrap();
    assert!(!yf.has_data());
    // a direct initialize stops at unmaterialized children
    assert!(!yf.initialize(&device)?);
    assert!(!yf.has_data());

    yf.must_initialize(&device)?;
    assert_eq!(first(&x), 5.0);
    assert_eq!(first(&y), -5.0);
    Ok(())
}

#[test]
fn uninitialize_cascades_through_subscribers() -> Result<()> {
    let a = scalar_var("a", 2.0)?;
    let b = scalar_var("b", 3.0)?;
    let x = f::add(&a, &b)?;
    let y = f::neg(&x)?;

    let device = CpuDevice::new();
    let yf = y.as_functor().unwrap();
    yf.must_initialize(&device)?;
    assert!(yf.has_data());

    x.as_functor().unwrap().uninitialize();
    assert!(!x.as_functor().unwrap().has_data());
    assert!(!yf.has_data(), "parents drop results derived from the cache");
    Ok(())
}

#[test]
fn random_ops_recompute_every_pass() -> Result<()> {
    let low = scalar_var("low", 0.0)?;
    let high = scalar_var("high", 1.0)?;
    let sample = f::rand_unif(&low, &high)?;

    let device = CountingDevice::new();
    let mut session = Session::new();
    session.track(std::slice::from_ref(&sample));
    session.update(&device)?;
    session.update(&device)?;
    assert_eq!(device.calls(), 2, "random sources are not cacheable");
    Ok(())
}
