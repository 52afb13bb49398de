//! Cluster membership invariants.

use fractal_mesh::cluster::{ClusterMembership, WorkStation};
use fractal_mesh::error::ClusterError;

fn ws(port: u16) -> WorkStation {
    WorkStation::new("127.0.0.1", port)
}

#[test]
fn test_add_rejects_duplicate() {
    let mut membership = ClusterMembership::default();
    assert_eq!(membership.add_peer(ws(1)).unwrap(), ws(1));
    assert!(matches!(
        membership.add_peer(ws(1)),
        Err(ClusterError::AlreadyRegistered(peer)) if peer == ws(1)
    ));
    assert_eq!(membership.len(), 1);
}

#[test]
fn test_remove_rejects_absent() {
    let mut membership = ClusterMembership::new([ws(1)]);
    membership.remove_peer(&ws(1)).unwrap();
    assert!(matches!(
        membership.remove_peer(&ws(1)),
        Err(ClusterError::NotRegistered(_))
    ));
    assert!(membership.is_empty());
}

#[test]
fn test_find_unknown_peer() {
    let membership = ClusterMembership::new([ws(1), ws(2)]);
    assert_eq!(membership.find(&ws(2)).unwrap(), &ws(2));
    assert!(matches!(
        membership.find(&ws(3)),
        Err(ClusterError::UnknownPeer(_))
    ));
}

#[test]
fn test_list_keeps_join_order() {
    let mut membership = ClusterMembership::new([ws(3), ws(1), ws(3)]);
    membership.add_peer(ws(2)).unwrap();
    assert_eq!(membership.list_peers(), vec![ws(3), ws(1), ws(2)]);

    membership.remove_peer(&ws(1)).unwrap();
    assert_eq!(membership.list_peers(), vec![ws(3), ws(2)]);
    assert_eq!(membership.clear(), vec![ws(3), ws(2)]);
    assert!(membership.is_empty());
}
