use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::sweeper;

/// Manages per-property engines. Each property gets its own Engine + WAL +
/// background sweepers. Property = database name from the pgwire connection.
pub struct PropertyManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    retention_ms: i64,
}

impl PropertyManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, retention_ms: i64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            retention_ms,
        }
    }

    /// Get or lazily create an engine for the given property.
    pub fn get_or_create(&self, property: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(property) {
            return Ok(engine.value().clone());
        }
        if property.len() > MAX_PROPERTY_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "property name too long",
            ));
        }
        if self.engines.len() >= MAX_PROPERTIES {
            return Err(std::io::Error::other("too many properties"));
        }

        // Sanitize property name to prevent path traversal
        let safe_name: String = property
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty property name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        // Spawn archiver + compactor for this property
        let archiver_engine = engine.clone();
        let retention = self.retention_ms;
        tokio::spawn(async move {
            sweeper::run_archiver(archiver_engine, retention).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            sweeper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(property.to_string(), engine.clone());
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("frontdesk_test_property").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn seed_room(engine: &Engine) -> Ulid {
        let type_id = Ulid::new();
        engine
            .create_room_type(RoomType {
                id: type_id,
                name: "Standard".into(),
                base_rate: 10_000,
                max_adults: 2,
                max_children: 2,
                bed_type: None,
            })
            .await
            .unwrap();
        let room_id = Ulid::new();
        engine.create_room(room_id, "101".into(), type_id).await.unwrap();
        room_id
    }

    #[tokio::test]
    async fn property_isolation() {
        let dir = test_data_dir("isolation");
        let pm = PropertyManager::new(dir, 1000, 604_800_000);

        let eng_a = pm.get_or_create("property_a").unwrap();
        let eng_b = pm.get_or_create("property_b").unwrap();

        let room_a = seed_room(&eng_a).await;
        let _room_b = seed_room(&eng_b).await;

        // A's room is invisible to B
        assert_eq!(eng_a.list_rooms().await.len(), 1);
        assert_eq!(eng_b.list_rooms().await.len(), 1);
        let cal_b = eng_b
            .room_calendar(room_a, 1_750_000_000_000, 1_750_086_400_000)
            .await
            .unwrap();
        assert!(cal_b.is_empty(), "unknown room in B yields no calendar");
    }

    #[tokio::test]
    async fn property_lazy_creation() {
        let dir = test_data_dir("lazy");
        let pm = PropertyManager::new(dir.clone(), 1000, 604_800_000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // Create a property
        let _eng = pm.get_or_create("my_hotel").unwrap();

        // WAL file should now exist
        assert!(dir.join("my_hotel.wal").exists());
    }

    #[tokio::test]
    async fn property_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let pm = PropertyManager::new(dir, 1000, 604_800_000);

        let eng1 = pm.get_or_create("foo").unwrap();
        let eng2 = pm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn property_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let pm = PropertyManager::new(dir.clone(), 1000, 604_800_000);

        // Path traversal attempt
        let _eng = pm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = pm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn property_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let pm = PropertyManager::new(dir, 1000, 604_800_000);

        let long_name = "x".repeat(MAX_PROPERTY_NAME_LEN + 1);
        let result = pm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("property name too long"));
    }

    #[tokio::test]
    async fn property_count_limit() {
        let dir = test_data_dir("count_limit");
        let pm = PropertyManager::new(dir, 1000, 604_800_000);

        for i in 0..MAX_PROPERTIES {
            pm.get_or_create(&format!("p{i}")).unwrap();
        }
        let result = pm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many properties"));
    }
}
