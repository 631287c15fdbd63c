use std::io::Write;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tasksync::config::TaskConfig;
use tasksync::due_date::TaskBucket;
use tasksync::error::TreeError;
use tasksync::models::{
    AttributeDataType, ListOption, TreeId, COMPLETION_DATE_ATTRIBUTE, DUE_DATE_ATTRIBUTE,
};
use tasksync::scheduler::FixedClock;
use tasksync::tree::DocumentTree;
use tasksync::workspace::{BucketCounts, Workspace};
use tempfile::NamedTempFile;

const SAMPLE_MAP: &str = r#"{
  "name": "Household",
  "root": {
    "text": "Household",
    "children": [
      { "text": "Buy milk", "attributes": { "Due Date": "2024-05-01 18:00:00" } },
      {
        "text": "Pay rent",
        "attributes": { "Due Date": "2024-05-03", "Completion Date": "2024-04-30 20:00:00" }
      },
      {
        "text": "Garden",
        "children": [
          { "text": "Mow lawn", "attributes": { "Due Date": "2024-04-28 07:00:00" } },
          { "text": "Plant roses", "attributes": { "Due Date": "sometime" } }
        ]
      }
    ]
  }
}"#;

fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").expect("valid test date")
}

fn setup() -> (Workspace, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(dt("2024-05-01 10:00")));
    (Workspace::new(TaskConfig::default(), clock.clone()), clock)
}

fn write_map(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write map file");
    file
}

mod load_map {
    use super::*;

    #[test]
    fn derives_tasks_from_the_file() {
        let (workspace, _clock) = setup();
        let file = write_map(SAMPLE_MAP);

        let map = workspace.load_map(file.path()).expect("Failed to load map");

        assert_eq!(map.name(), "Household");
        assert_eq!(map.node_count(), 6);
        let pending: Vec<(String, TaskBucket)> = workspace
            .pending_tasks()
            .into_iter()
            .map(|t| (t.text, t.bucket))
            .collect();
        assert_eq!(
            pending,
            vec![
                ("Mow lawn".to_string(), TaskBucket::Overdue),
                ("Buy milk".to_string(), TaskBucket::Today),
            ]
        );
        let completed = workspace.completed_tasks();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].text, "Pay rent");
        assert_eq!(completed[0].due_date, dt("2024-05-03 07:00"));
    }

    #[test]
    fn registers_task_attributes_as_system_date_times() {
        let (workspace, _clock) = setup();
        let file = write_map(SAMPLE_MAP);

        let map = workspace.load_map(file.path()).expect("Failed to load map");

        for name in [DUE_DATE_ATTRIBUTE, COMPLETION_DATE_ATTRIBUTE] {
            let spec = map.attribute_spec(name).expect("task attribute registered");
            assert_eq!(spec.data_type, AttributeDataType::DateTime, "{}", name);
            assert_eq!(spec.list_option, ListOption::NoList, "{}", name);
            assert!(spec.system_owned, "{}", name);
        }
    }

    #[test]
    fn keeps_declared_specs_from_the_file() {
        let (workspace, _clock) = setup();
        let file = write_map(
            r#"{
              "name": "Notes",
              "attribute_specs": [
                { "name": "Owner", "required": false, "data_type": "text",
                  "list_option": "no_list", "system_owned": false }
              ],
              "root": { "text": "Notes", "attributes": { "Owner": "sam" } }
            }"#,
        );

        let map = workspace.load_map(file.path()).expect("Failed to load map");

        let owner = map.attribute_spec("Owner").expect("declared spec kept");
        assert_eq!(owner.data_type, AttributeDataType::Text);
        assert_eq!(map.get_attribute(map.root(), &owner), Some("sam".to_string()));
        assert_eq!(map.snapshot().attribute_specs.len(), 3);
    }

    #[test]
    fn reports_missing_files() {
        let (workspace, _clock) = setup();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let err = workspace
            .load_map(&dir.path().join("missing.json"))
            .expect_err("missing file must fail");

        assert!(format!("{:#}", err).contains("Failed to read map file"));
        assert!(workspace.summaries().is_empty());
    }

    #[test]
    fn reports_malformed_files() {
        let (workspace, _clock) = setup();
        let file = write_map("{ \"name\": ");

        let err = workspace.load_map(file.path()).expect_err("bad json must fail");

        assert!(format!("{:#}", err).contains("Failed to parse map file"));
    }
}

mod close_map {
    use super::*;

    #[test]
    fn purges_the_map_tasks() {
        let (workspace, _clock) = setup();
        let file = write_map(SAMPLE_MAP);
        let map = workspace.load_map(file.path()).expect("Failed to load map");
        let other = workspace.create_map("Work");
        let due = other.attribute_spec(DUE_DATE_ATTRIBUTE).expect("due date spec");
        let node = other.add_node(other.root(), "Ship release").expect("add node");
        other
            .set_attribute(node, &due, "2024-05-02 07:00:00".to_string())
            .expect("set due date");

        assert_eq!(workspace.close_map(map.id()), Ok(3));

        let remaining = workspace.all_tasks();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tree_id, other.id());
        assert!(!workspace.engine().is_tracking(map.id()));
        assert_eq!(map.listener_count(), 0);
    }

    #[test]
    fn unknown_map_is_an_error() {
        let (workspace, _clock) = setup();
        let id = TreeId::new();
        assert_eq!(workspace.close_map(id), Err(TreeError::TreeNotFound(id)));
    }
}

mod buckets {
    use super::*;

    #[test]
    fn follow_the_clock() {
        let (workspace, clock) = setup();
        let file = write_map(SAMPLE_MAP);
        workspace.load_map(file.path()).expect("Failed to load map");

        assert_eq!(
            workspace.bucket_counts(),
            BucketCounts {
                overdue: 1,
                today: 1,
                ..BucketCounts::default()
            }
        );

        clock.set(dt("2024-05-02 00:00"));

        assert_eq!(
            workspace.bucket_counts(),
            BucketCounts {
                overdue: 2,
                ..BucketCounts::default()
            }
        );
    }
}
