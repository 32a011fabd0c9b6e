//! Declarative full replacement of owned child collections.
//!
//! The API contract for role grants, product images and product specs is
//! "the collection becomes exactly what the caller sent". There is no diff or
//! patch: every replace deletes the parent's current children and inserts the
//! new ones as fresh rows, inside one transaction.

use crate::database::models::{NewImage, NewSpec};
use crate::database::store::{ChildKind, Store, StoreError, StoreTx};

/// A complete new child collection for one parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Children {
    /// Permission identifiers granted to a role
    Grants(Vec<i64>),
    Images(Vec<NewImage>),
    Specs(Vec<NewSpec>),
}

impl Children {
    pub fn kind(&self) -> ChildKind {
        match self {
            Children::Grants(_) => ChildKind::RolePermissions,
            Children::Images(_) => ChildKind::ProductImages,
            Children::Specs(_) => ChildKind::ProductSpecs,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Children::Grants(ids) => ids.len(),
            Children::Images(images) => images.len(),
            Children::Specs(specs) => specs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AssociationReplacer;

impl AssociationReplacer {
    /// Replace the children of `parent_id` on an already open transaction.
    ///
    /// The parent row is locked first, so concurrent replacements of the same
    /// parent serialize and the last to commit wins outright.
    ///
    /// The caller owns commit and rollback; use this when the replacement is
    /// one step of a larger write (e.g. a product update).
    pub async fn replace_within(
        tx: &mut dyn StoreTx,
        parent_id: i64,
        children: &Children,
    ) -> Result<usize, StoreError> {
        tx.lock_parent(children.kind(), parent_id).await?;
        let removed = tx.clear_children(children.kind(), parent_id).await?;

        match children {
            Children::Grants(permission_ids) => {
                for permission_id in permission_ids {
                    tx.insert_grant(parent_id, *permission_id).await?;
                }
            }
            Children::Images(images) => {
                for image in images {
                    tx.insert_image(parent_id, image).await?;
                }
            }
            Children::Specs(specs) => {
                for spec in specs {
                    tx.insert_spec(parent_id, spec).await?;
                }
            }
        }

        tracing::debug!(
            "Replaced {:?} of parent {}: removed {}, inserted {}",
            children.kind(),
            parent_id,
            removed,
            children.len()
        );
        Ok(children.len())
    }

    /// Replace the children of `parent_id` in a transaction of its own.
    /// All-or-nothing: on any failure the previous collection stays intact.
    pub async fn replace(
        store: &dyn Store,
        parent_id: i64,
        children: &Children,
    ) -> Result<usize, StoreError> {
        let mut tx = store.begin().await?;

        match Self::replace_within(tx.as_mut(), parent_id, children).await {
            Ok(inserted) => {
                tx.commit().await?;
                Ok(inserted)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }
}

/// Roll back after a failed step. The original error is what the caller
/// reports, so a rollback failure is only logged.
pub async fn rollback_quietly(tx: Box<dyn StoreTx>) {
    if let Err(e) = tx.rollback().await {
        tracing::error!("Transaction rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::{NewPermission, NewRole, ProductFields};

    async fn store_with_role_and_permissions() -> (MemoryStore, i64, Vec<i64>) {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for code in ["user:list", "user:create", "product:list"] {
            let permission = store
                .create_permission(NewPermission {
                    name: code.to_string(),
                    description: String::new(),
                    code: code.to_string(),
                })
                .await
                .unwrap();
            ids.push(permission.id);
        }

        let mut tx = store.begin().await.unwrap();
        let role = tx
            .create_role(NewRole { name: "editor".into(), description: String::new() })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        (store, role.id, ids)
    }

    async fn grant_ids(store: &MemoryStore, role_id: i64) -> Vec<i64> {
        store
            .role_permissions(role_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    #[tokio::test]
    async fn replaces_grants_completely() {
        let (store, role_id, ids) = store_with_role_and_permissions().await;

        AssociationReplacer::replace(&store, role_id, &Children::Grants(vec![ids[0], ids[1]]))
            .await
            .unwrap();
        AssociationReplacer::replace(&store, role_id, &Children::Grants(vec![ids[2]]))
            .await
            .unwrap();

        assert_eq!(grant_ids(&store, role_id).await, vec![ids[2]]);
    }

    #[tokio::test]
    async fn empty_collection_clears_all_children() {
        let (store, role_id, ids) = store_with_role_and_permissions().await;
        AssociationReplacer::replace(&store, role_id, &Children::Grants(ids.clone()))
            .await
            .unwrap();

        let inserted = AssociationReplacer::replace(&store, role_id, &Children::Grants(vec![]))
            .await
            .unwrap();

        assert_eq!(inserted, 0);
        assert!(grant_ids(&store, role_id).await.is_empty());
    }

    #[tokio::test]
    async fn failed_insert_leaves_previous_collection_untouched() {
        let (store, role_id, ids) = store_with_role_and_permissions().await;
        AssociationReplacer::replace(&store, role_id, &Children::Grants(vec![ids[0]]))
            .await
            .unwrap();

        // Third element references a permission that does not exist
        let result = AssociationReplacer::replace(
            &store,
            role_id,
            &Children::Grants(vec![ids[1], ids[2], 9_999]),
        )
        .await;

        assert!(matches!(result, Err(StoreError::MissingReference(_))));
        assert_eq!(grant_ids(&store, role_id).await, vec![ids[0]]);
    }

    #[tokio::test]
    async fn duplicate_grant_rolls_back() {
        let (store, role_id, ids) = store_with_role_and_permissions().await;
        AssociationReplacer::replace(&store, role_id, &Children::Grants(vec![ids[2]]))
            .await
            .unwrap();

        let result =
            AssociationReplacer::replace(&store, role_id, &Children::Grants(vec![ids[0], ids[0]])).await;

        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(grant_ids(&store, role_id).await, vec![ids[2]]);
    }

    #[tokio::test]
    async fn missing_parent_is_refused_even_when_clearing() {
        let (store, role_id, _) = store_with_role_and_permissions().await;

        let missing = role_id + 100;
        let result = AssociationReplacer::replace(&store, missing, &Children::Grants(vec![])).await;
        match result {
            Err(StoreError::MissingReference(what)) => assert_eq!(what, format!("role {}", missing)),
            other => panic!("expected a missing role, got {:?}", other),
        }

        let result = AssociationReplacer::replace(&store, 404, &Children::Specs(vec![])).await;
        match result {
            Err(StoreError::MissingReference(what)) => assert_eq!(what, "product 404"),
            other => panic!("expected a missing product, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn images_get_fresh_ids_and_sort_order() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let product = tx
            .create_product(
                &ProductFields { title: "lamp".into(), description: String::new(), status: 1 },
                None,
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let first = Children::Images(vec![NewImage { url: "old.jpg".into(), sort: 0 }]);
        AssociationReplacer::replace(&store, product.id, &first).await.unwrap();
        let old_ids: Vec<i64> = store
            .find_product(product.id)
            .await
            .unwrap()
            .unwrap()
            .images
            .iter()
            .map(|i| i.id)
            .collect();

        let second = Children::Images(vec![
            NewImage { url: "a.jpg".into(), sort: 2 },
            NewImage { url: "b.jpg".into(), sort: 1 },
        ]);
        AssociationReplacer::replace(&store, product.id, &second).await.unwrap();

        let images = store.find_product(product.id).await.unwrap().unwrap().images;
        let urls: Vec<&str> = images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["b.jpg", "a.jpg"]);
        assert!(images.iter().all(|i| i.product_id == product.id));
        assert!(images.iter().all(|i| !old_ids.contains(&i.id)));
    }

    #[tokio::test]
    async fn concurrent_replacements_on_one_parent_serialize() {
        let (store, role_id, ids) = store_with_role_and_permissions().await;

        let sets = vec![vec![ids[0]], vec![ids[1], ids[2]], vec![ids[0], ids[2]]];
        let children: Vec<Children> = sets.iter().map(|set| Children::Grants(set.clone())).collect();
        let futures = children
            .iter()
            .map(|c| AssociationReplacer::replace(&store, role_id, c));
        let results = futures::future::join_all(futures).await;
        assert!(results.iter().all(|r| r.is_ok()));

        // Whatever committed last wins; the result is exactly one of the inputs
        let mut current = grant_ids(&store, role_id).await;
        current.sort();
        assert!(sets.iter().any(|set| {
            let mut set = set.clone();
            set.sort();
            set == current
        }));
    }
}
