use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use trellis::distrib::directory::InMemoryDirectory;
use trellis::distrib::manager::ClusterManager;
use trellis::distrib::reference::RemoteRef;
use trellis::distrib::session::DistSession;
use trellis::distrib::transport::{InProcessTransport, Transport};
use trellis::distrib::DistrError;
use trellis::graph::leaf::Leaf;
use trellis::graph::node::{Node, NodePtr};
use trellis::ops::functional as f;
use trellis::session::SessionError;
use trellis::tensor::{DType, Shape};
use trellis_ref_cpu::CpuDevice;

struct Cluster {
    manager: Arc<ClusterManager>,
    session: DistSession,
}

fn two_peers() -> (Cluster, Cluster) {
    let directory = InMemoryDirectory::new();
    let alpha = ClusterManager::new("alpha", directory.clone());
    let beta = ClusterManager::new("beta", directory);

    let transport = InProcessTransport::new();
    transport.join(&alpha);
    transport.join(&beta);
    let transport: Arc<dyn Transport> = transport;
    alpha.connect(transport.clone());
    beta.connect(transport);

    (
        Cluster {
            session: DistSession::new(alpha.clone()),
            manager: alpha,
        },
        Cluster {
            session: DistSession::new(beta.clone()),
            manager: beta,
        },
    )
}

fn var(label: &str, data: &[f32]) -> Result<NodePtr> {
    let shape = Shape::new(&[data.len() as u16])?;
    let leaf: NodePtr = Leaf::variable(label, shape, data.to_vec())?;
    Ok(leaf)
}

#[test]
fn lookup_without_recursion_fails_locally() -> Result<()> {
    let (alpha, beta) = two_peers();

    let value = var("v", &[2.0, 4.0])?;
    let id = beta.manager.expose(&value);

    let err = alpha.manager.lookup_node(&id, false).unwrap_err();
    assert!(matches!(err, DistrError::UnknownNode { .. }));

    // the owner resolves it locally regardless
    let local = beta.manager.lookup_node(&id, false)?;
    assert_eq!(local.value().unwrap(), vec![2.0, 4.0]);
    Ok(())
}

#[test]
fn recursive_lookup_builds_a_proxy() -> Result<()> {
    let (alpha, beta) = two_peers();

    let value = var("v", &[2.0, 4.0])?;
    let id = beta.manager.expose(&value);
    assert_eq!(beta.manager.lookup_id(&value).as_deref(), Some(id.as_str()));

    let proxy = alpha.manager.lookup_node(&id, true)?;
    let reference = proxy.as_remote().expect("foreign nodes resolve to proxies");
    assert_eq!(reference.cluster_id(), "beta");
    assert_eq!(reference.node_id(), id);
    assert_eq!(proxy.shape().trimmed(), vec![2]);

    // resolving again reuses the cached proxy
    let again = alpha.manager.lookup_node(&id, true)?;
    assert!(Arc::ptr_eq(&proxy, &again));
    Ok(())
}

#[test]
fn unknown_ids_are_a_typed_miss() {
    let (alpha, _beta) = two_peers();
    let err = alpha.manager.lookup_node("no-such-node", true).unwrap_err();
    assert!(matches!(err, DistrError::NoPeer { .. }));
}

#[test]
fn remote_dependencies_resolve_before_local_evaluation() -> Result<()> {
    let (mut alpha, mut beta) = two_peers();
    let device = CpuDevice::new();

    // beta owns x = a + b
    let a = var("a", &[1.0, 2.0])?;
    let b = var("b", &[3.0, 4.0])?;
    let x = f::add(&a, &b)?;
    beta.session.track(std::slice::from_ref(&x));
    beta.session.update(&device)?;
    let id = beta.manager.lookup_id(&x).expect("tracked nodes are exposed");

    // alpha computes y = x * c against a proxy for x
    let proxy = alpha.manager.lookup_node(&id, true)?;
    let c = var("c", &[10.0, 10.0])?;
    let y = f::mul(&proxy, &c)?;
    alpha.session.track(std::slice::from_ref(&y));
    alpha.session.update(&device)?;

    assert_eq!(y.value().unwrap(), vec![40.0, 60.0]);
    Ok(())
}

#[test]
fn remote_updates_flow_on_reevaluation() -> Result<()> {
    let (mut alpha, mut beta) = two_peers();
    let device = CpuDevice::new();

    let a = var("a", &[1.0])?;
    let b = var("b", &[1.0])?;
    let x = f::add(&a, &b)?;
    beta.session.track(std::slice::from_ref(&x));
    beta.session.update(&device)?;
    let id = beta.manager.lookup_id(&x).unwrap();

    let proxy = alpha.manager.lookup_node(&id, true)?;
    let c = var("c", &[2.0])?;
    let y = f::mul(&proxy, &c)?;
    alpha.session.track(std::slice::from_ref(&y));
    alpha.session.update(&device)?;
    assert_eq!(y.value().unwrap(), vec![4.0]);

    // the owner recomputes; the consumer picks the new value up
    a.as_leaf().unwrap().assign(&[5.0])?;
    beta.session.update(&device)?;
    alpha.session.update(&device)?;
    assert_eq!(y.value().unwrap(), vec![12.0]);
    Ok(())
}

#[test]
fn stale_remote_payloads_are_dropped() -> Result<()> {
    let reference = RemoteRef::new("beta", "node-1", Shape::new(&[2])?, DType::F32);
    assert!(reference.absorb(&[1.0, 2.0], 3));
    assert_eq!(reference.value().unwrap(), vec![1.0, 2.0]);

    assert!(!reference.absorb(&[9.0, 9.0], 3));
    assert!(!reference.absorb(&[9.0, 9.0], 1));
    assert_eq!(reference.value().unwrap(), vec![1.0, 2.0]);

    assert!(reference.absorb(&[5.0, 6.0], 4));
    assert_eq!(reference.value().unwrap(), vec![5.0, 6.0]);
    Ok(())
}

#[test]
fn unreachable_clusters_fail_the_update() -> Result<()> {
    let (alpha, _beta) = two_peers();
    let device = CpuDevice::new();

    // a proxy pointing at a cluster the transport has never heard of
    let ghost: NodePtr = RemoteRef::new("gamma", "node-9", Shape::new(&[1])?, DType::F32);
    let c = var("c", &[2.0])?;
    let y = f::mul(&ghost, &c)?;

    let mut session =
        DistSession::new(alpha.manager.clone()).with_poll_interval(Duration::from_millis(1));
    session.track(std::slice::from_ref(&y));
    let err = session.update(&device).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Remote(DistrError::UnknownCluster { .. })
    ));
    Ok(())
}

#[test]
fn untracked_targets_stay_an_error_in_the_distributed_session() -> Result<()> {
    let (mut alpha, _beta) = two_peers();
    let device = CpuDevice::new();

    let a = var("a", &[1.0])?;
    let b = var("b", &[2.0])?;
    let tracked = f::add(&a, &b)?;
    let stranger = f::mul(&a, &b)?;

    alpha.session.track(std::slice::from_ref(&tracked));
    let err = alpha
        .session
        .update_target(&device, std::slice::from_ref(&stranger))
        .unwrap_err();
    assert!(matches!(err, SessionError::UntrackedTarget { .. }));
    Ok(())
}
