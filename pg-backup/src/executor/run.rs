//! A single backup run: timestamp and the paths derived from it.

use crate::config::Config;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BackupRun {
    pub id: Uuid,
    /// `YYYY-MM-DD/HH-MM`
    pub stamp: String,
    /// Run directory under the local backup root (transfer source)
    pub local_dir: PathBuf,
    /// Run directory under the document backup root (produce target)
    pub doc_dir: PathBuf,
}

impl BackupRun {
    pub fn new(config: &Config, started_at: DateTime<Local>) -> Self {
        let date = started_at.format("%Y-%m-%d").to_string();
        let time = started_at.format("%H-%M").to_string();

        Self {
            id: Uuid::new_v4(),
            stamp: format!("{}/{}", date, time),
            local_dir: config.paths.backup_dir.join(&date).join(&time),
            doc_dir: config.paths.doc_root().join(&date).join(&time),
        }
    }

    /// Produce command line with the document path substituted
    pub fn produce_command(&self, template: &str) -> String {
        let path = dir_with_slash(&self.doc_dir);
        if template.contains("{path}") {
            template.replace("{path}", &path)
        } else {
            format!("{} {}", template.trim_end(), path)
        }
    }

    /// rsync-style source: the run directory's contents, not the directory itself
    pub fn transfer_source(&self) -> String {
        dir_with_slash(&self.local_dir)
    }
}

fn dir_with_slash(path: &Path) -> String {
    let mut s = path.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> Config {
        Config::from_toml_str(
            r#"
[paths]
backup_dir = "/var/backups/pg/"
doc_backup_dir = "/backups"

[commands]
produce = "docker exec postgres sh -c \"pg_basebackup -D {path}\""

[remote]
host = "backup.example.net"
user = "backup"
path = "/srv/pg"

[schedule]
mode = "hourly"
every = 1
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_paths_from_timestamp() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 42).unwrap();
        let run = BackupRun::new(&config(), at);

        assert_eq!(run.stamp, "2026-03-07/09-05");
        assert_eq!(run.local_dir, PathBuf::from("/var/backups/pg/2026-03-07/09-05"));
        assert_eq!(run.doc_dir, PathBuf::from("/backups/2026-03-07/09-05"));
        assert_eq!(run.transfer_source(), "/var/backups/pg/2026-03-07/09-05/");
    }

    #[test]
    fn test_produce_command_placeholder() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 23, 59, 0).unwrap();
        let run = BackupRun::new(&config(), at);

        assert_eq!(
            run.produce_command("docker exec postgres sh -c \"pg_basebackup -D {path}\""),
            "docker exec postgres sh -c \"pg_basebackup -D /backups/2026-03-07/23-59/\""
        );
        assert_eq!(
            run.produce_command("pg_basebackup -D "),
            "pg_basebackup -D /backups/2026-03-07/23-59/"
        );
    }

    #[test]
    fn test_runs_get_distinct_ids() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap();
        assert_ne!(BackupRun::new(&config(), at).id, BackupRun::new(&config(), at).id);
    }
}
