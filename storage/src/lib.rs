//! Self-hosted metadata table and per-type storage facade (spec §2
//! components C3 + C6).

pub mod facade;
pub mod index;
pub mod join;
pub mod metadata;
pub mod query_exec;
pub mod trigger;

pub use facade::{Closeable, Storage};
pub use index::IndexKeySource;
pub use join::{JoinResolver, JoinTarget};
pub use metadata::MetadataRecord;
pub use query_exec::QueryBuilder;
pub use trigger::{TriggerEvent, TriggerFn, TriggerId};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use codec::RkyvCodec;
    use common::{Direction, EvolutionStrategy, TypeName};
    use kv_engine::env::EnvBuilder;
    use query::{Filter, IndexInfo, Ordering};
    use rkyv::{Archive, Deserialize, Serialize};
    use txn::Scope;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
    struct Account {
        email: String,
        balance: u32,
    }

    impl IndexKeySource for Account {
        fn index_key(&self, properties: &[String]) -> Vec<u8> {
            let mut out = Vec::new();
            for prop in properties {
                let segment: Vec<u8> = match prop.as_str() {
                    "email" => self.email.as_bytes().to_vec(),
                    "balance" => self.balance.to_be_bytes().to_vec(),
                    _ => Vec::new(),
                };
                out.extend_from_slice(&(segment.len() as u32).to_be_bytes());
                out.extend_from_slice(&segment);
            }
            out
        }
    }

    fn opened() -> (tempfile::TempDir, Storage<Account, RkyvCodec<Account>>) {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(EnvBuilder::new(dir.path()).open().unwrap());
        let scope = Arc::new(Scope::new(env.clone()));
        let indices = vec![IndexInfo {
            name: "by_email".into(),
            properties: vec![("email".into(), Direction::Ascending)],
            unique: true,
            clustered: false,
        }];
        let storage = Storage::open(
            env,
            scope,
            TypeName::new("Account"),
            RkyvCodec::new(1),
            EvolutionStrategy::Standard,
            indices,
            vec![("id".into(), Direction::Ascending)],
        )
        .unwrap();
        (dir, storage)
    }

    #[test]
    fn insert_load_round_trip() {
        let (_dir, storage) = opened();
        let scope = &storage.scope;
        let frame = scope.enter(common::IsolationLevel::ReadCommitted, true);
        let acc = Account {
            email: "a@example.com".into(),
            balance: 100,
        };
        storage.insert(frame, b"1", &acc).unwrap();
        let loaded = storage.load(frame, b"1").unwrap();
        assert_eq!(loaded, acc);
        scope.commit(frame).unwrap();
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_dir, storage) = opened();
        let scope = &storage.scope;
        let frame = scope.enter(common::IsolationLevel::ReadCommitted, true);
        let acc = Account {
            email: "a@example.com".into(),
            balance: 100,
        };
        storage.insert(frame, b"1", &acc).unwrap();
        let err = storage.insert(frame, b"2", &acc).unwrap_err();
        assert!(matches!(err, common::StoreError::UniqueConstraint { .. }));
        scope.commit(frame).unwrap();
    }

    #[test]
    fn try_delete_reports_whether_a_row_was_removed() {
        let (_dir, storage) = opened();
        let scope = &storage.scope;
        let frame = scope.enter(common::IsolationLevel::ReadCommitted, true);
        let acc = Account {
            email: "a@example.com".into(),
            balance: 100,
        };
        storage.insert(frame, b"1", &acc).unwrap();
        assert!(storage.try_delete(frame, b"1").unwrap());
        assert!(!storage.try_delete(frame, b"1").unwrap());
        scope.commit(frame).unwrap();
    }

    #[test]
    fn query_by_unique_index_returns_match() {
        let (_dir, storage) = opened();
        let scope = &storage.scope;
        let frame = scope.enter(common::IsolationLevel::ReadCommitted, true);
        storage
            .insert(
                frame,
                b"1",
                &Account {
                    email: "a@example.com".into(),
                    balance: 50,
                },
            )
            .unwrap();
        storage
            .insert(
                frame,
                b"2",
                &Account {
                    email: "b@example.com".into(),
                    balance: 75,
                },
            )
            .unwrap();

        let results = storage
            .query()
            .filter(Filter::Cmp(query::Predicate::new(
                "email",
                query::Comparator::Eq,
                Account {
                    email: "b@example.com".into(),
                    balance: 0,
                }
                .index_key(&["email".to_string()]),
            )))
            .fetch(frame)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].email, "b@example.com");
        scope.commit(frame).unwrap();
    }

    #[test]
    fn full_scan_with_ordering() {
        let (_dir, storage) = opened();
        let scope = &storage.scope;
        let frame = scope.enter(common::IsolationLevel::ReadCommitted, true);
        for (key, email, balance) in [(b"1" as &[u8], "c@example.com", 5u32), (b"2", "a@example.com", 9), (b"3", "b@example.com", 1)] {
            storage
                .insert(
                    frame,
                    key,
                    &Account {
                        email: email.into(),
                        balance,
                    },
                )
                .unwrap();
        }
        let results = storage
            .query()
            .order_by(Ordering::by("email", Direction::Ascending))
            .fetch(frame)
            .unwrap();
        let emails: Vec<&str> = results.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, vec!["a@example.com", "b@example.com", "c@example.com"]);
        scope.commit(frame).unwrap();
    }
}
