//! Command implementations.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{JobState, RotationReport};
use fs2::FileExt;
use tracing::{info, warn};
use vault::rotation::{Checkpoint, JobKind, OperatorConfirmation, RotationJob};
use vault::schema::{self, SchemaRegistry};
use vault::store::SqliteStore;
use vault::{CipherService, Config};

use crate::cli::JobArgs;
use crate::config::{configured_key, decode_key, JobSettings};

/// `encrypt-existing` and `rotate-key`.
pub async fn run_job(
    kind: JobKind,
    args: &JobArgs,
    new_key: Option<&str>,
    cfg: &Config,
) -> Result<()> {
    let settings = JobSettings::resolve(args, cfg)?;
    let old_key = configured_key(cfg)?;
    let new_key = match new_key {
        Some(encoded) => decode_key("NEW_ENCRYPTION_KEY", encoded)?,
        None => old_key.clone(),
    };
    if kind == JobKind::RotateKey && old_key.fingerprint() == new_key.fingerprint() {
        anyhow::bail!("the new key is the active key; use encrypt-existing instead");
    }
    let new_fingerprint = new_key.fingerprint();

    let _lock = acquire_lock(&settings.lock_path)?;

    let registry = SchemaRegistry::new();
    schema::load_file(&settings.schema, &registry)
        .await
        .with_context(|| format!("failed to load schema {}", settings.schema.display()))?;
    let store = SqliteStore::open(&settings.database)
        .with_context(|| format!("failed to open database {}", settings.database.display()))?;

    let mut job = match kind {
        JobKind::EncryptExisting => {
            RotationJob::encrypt_existing(Arc::new(store), registry.tables(), new_key)
        }
        JobKind::RotateKey => RotationJob::new(Arc::new(store), registry.tables(), old_key, new_key),
    }
    .batch_size(settings.batch_size)
    .dry_run(settings.dry_run);

    if let Some(path) = &settings.checkpoint {
        if let Some(cp) = Checkpoint::load(path).await? {
            let completed_tables = cp.completed_tables.len();
            job = job.resume_from(cp).with_context(|| {
                format!(
                    "refusing to resume {}; remove it to start over",
                    path.display()
                )
            })?;
            info!(job_id = %job.id(), completed_tables, "resuming from checkpoint");
        }
        job = job.checkpoint_path(path);
    }

    let confirmation = if settings.dry_run {
        None
    } else {
        Some(confirm(kind.phrase(), args.confirm.as_deref())?)
    };

    let report = job.run(confirmation.as_ref()).await?;
    print_report(&report)?;

    match report.state {
        JobState::Completed => {
            if !settings.dry_run {
                if let Some(path) = &settings.checkpoint {
                    remove_checkpoint(path);
                }
                if kind == JobKind::RotateKey {
                    eprintln!(
                        "Rotation completed. Set ENCRYPTION_KEY to the new key \
                         (fingerprint {new_fingerprint}) and restart the services."
                    );
                }
            }
            Ok(())
        }
        state => anyhow::bail!(
            "job {} ended in state {state:?}: {}",
            report.job_id,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// `generate-key`.
pub fn generate_key<W: Write>(out: &mut W) -> Result<()> {
    let key = CipherService::generate_key();
    writeln!(out, "{}", key.to_encoded())?;
    info!(fingerprint = %key.fingerprint(), "generated key");
    Ok(())
}

/// `derive-key`. Prints the key, then the salt needed to derive it again.
pub fn derive_key<W: Write>(password: &str, salt: Option<&str>, out: &mut W) -> Result<()> {
    let salt = salt
        .map(|s| STANDARD.decode(s.trim()).context("--salt is not valid base64"))
        .transpose()?;
    let derived = CipherService::derive_key(password, salt.as_deref())?;
    writeln!(out, "key:  {}", derived.key.to_encoded())?;
    writeln!(out, "salt: {}", STANDARD.encode(&derived.salt))?;
    Ok(())
}

/// `encrypt-file`.
pub fn encrypt_file(cfg: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let svc = CipherService::new(configured_key(cfg)?, true);
    let written = svc
        .encrypt_file(input, output)
        .with_context(|| format!("failed to encrypt {}", input.display()))?;
    println!("{}", written.display());
    Ok(())
}

/// `decrypt-file`.
pub fn decrypt_file(cfg: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let svc = CipherService::new(configured_key(cfg)?, true);
    let written = svc
        .decrypt_file(input, output)
        .with_context(|| format!("failed to decrypt {}", input.display()))?;
    println!("{}", written.display());
    Ok(())
}

fn confirm(phrase: &str, supplied: Option<&str>) -> Result<OperatorConfirmation> {
    let confirmation = match supplied {
        Some(typed) => OperatorConfirmation::from_phrase(phrase, typed)?,
        None => {
            let stdin = io::stdin();
            OperatorConfirmation::prompt(phrase, &mut stdin.lock(), &mut io::stderr())?
        }
    };
    Ok(confirmation)
}

/// Exclusive advisory lock, released when the returned file is dropped.
fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open lock file {}", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "another job holds {}; only one rotation may run at a time",
            path.display()
        )
    })?;
    Ok(file)
}

fn remove_checkpoint(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove completed checkpoint");
    }
}

fn print_report(report: &RotationReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialise report")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vault::rotation::{ENCRYPT_PHRASE, ROTATE_PHRASE};
    use vault::store::{RecordId, RecordStore};
    use vault::{
        CryptoContext, EncryptedColumn, EncryptedScalar, EncryptionKey, EncryptionMode, StoredValue,
    };

    const SCHEMA: &str = "tables:\n  borrowers:\n    primary_key: id\n    columns:\n      ssn: { kind: scalar, max_length: 11 }\n";

    fn cfg_with(key: &EncryptionKey) -> Config {
        Config {
            encryption_key: Some(key.to_encoded()),
            ..Config::default()
        }
    }

    async fn seed(dir: &Path) -> (PathBuf, PathBuf) {
        let db = dir.join("loans.db");
        let schema_path = dir.join("schema.yaml");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let store = SqliteStore::open(&db).unwrap();
        let tables = schema::parse_schema(SCHEMA).unwrap();
        store
            .execute_batch(&tables["borrowers"].create_table_sql(vault::column::Dialect::Sqlite))
            .await
            .unwrap();
        for i in 1..=3i64 {
            store
                .insert(
                    "borrowers",
                    "id",
                    RecordId::Int(i),
                    vec![("ssn".into(), StoredValue::Text(format!("000-00-000{i}")))],
                )
                .await
                .unwrap();
        }
        (db, schema_path)
    }

    fn job_args(db: PathBuf, schema: PathBuf, phrase: &str) -> JobArgs {
        JobArgs {
            database: db,
            schema,
            dry_run: false,
            batch_size: Some(2),
            checkpoint: None,
            confirm: Some(phrase.to_owned()),
        }
    }

    #[tokio::test]
    async fn encrypt_then_rotate_sqlite_database() {
        let dir = tempfile::tempdir().unwrap();
        let (db, schema_path) = seed(dir.path()).await;
        let (k1, k2) = (EncryptionKey::generate(), EncryptionKey::generate());

        let args = job_args(db.clone(), schema_path.clone(), ENCRYPT_PHRASE);
        run_job(JobKind::EncryptExisting, &args, None, &cfg_with(&k1))
            .await
            .unwrap();

        let args = job_args(db.clone(), schema_path, ROTATE_PHRASE);
        run_job(JobKind::RotateKey, &args, Some(&k2.to_encoded()), &cfg_with(&k1))
            .await
            .unwrap();

        let store = SqliteStore::open(&db).unwrap();
        let rows = store
            .load_batch("borrowers", "id", &["ssn".to_owned()], None, 10)
            .await
            .unwrap();
        let ctx = CryptoContext::new(
            Arc::new(CipherService::new(k2, true)),
            EncryptionMode::STRICT,
        );
        let col = EncryptedScalar::new(ctx, 11);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(
                col.decode(&row.values["ssn"]).unwrap(),
                Some(format!("000-00-000{}", i + 1))
            );
        }
    }

    #[tokio::test]
    async fn wrong_phrase_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (db, schema_path) = seed(dir.path()).await;
        let key = EncryptionKey::generate();

        let args = job_args(db.clone(), schema_path, "yes");
        assert!(run_job(JobKind::EncryptExisting, &args, None, &cfg_with(&key))
            .await
            .is_err());

        let store = SqliteStore::open(&db).unwrap();
        let rows = store
            .load_batch("borrowers", "id", &["ssn".to_owned()], None, 1)
            .await
            .unwrap();
        assert_eq!(rows[0].values["ssn"], StoredValue::Text("000-00-0001".into()));
    }

    #[tokio::test]
    async fn rotating_to_the_same_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (db, schema_path) = seed(dir.path()).await;
        let key = EncryptionKey::generate();
        let args = job_args(db, schema_path, ROTATE_PHRASE);
        assert!(run_job(JobKind::RotateKey, &args, Some(&key.to_encoded()), &cfg_with(&key))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn checkpoint_from_another_rotation_is_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let (db, schema_path) = seed(dir.path()).await;
        let (k1, k2, k3) = (
            EncryptionKey::generate(),
            EncryptionKey::generate(),
            EncryptionKey::generate(),
        );
        let checkpoint = dir.path().join("rotation.json");

        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let mut to_k2 = RotationJob::new(store, Vec::new(), k1.clone(), k2)
            .checkpoint()
            .clone();
        to_k2.completed_tables.push("borrowers".into());
        to_k2.save(&checkpoint).await.unwrap();

        let mut args = job_args(db.clone(), schema_path, ROTATE_PHRASE);
        args.checkpoint = Some(checkpoint.clone());
        let err = run_job(JobKind::RotateKey, &args, Some(&k3.to_encoded()), &cfg_with(&k1))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("different job"), "{err:#}");
        assert!(checkpoint.exists());

        let store = SqliteStore::open(&db).unwrap();
        let rows = store
            .load_batch("borrowers", "id", &["ssn".to_owned()], None, 1)
            .await
            .unwrap();
        assert_eq!(rows[0].values["ssn"], StoredValue::Text("000-00-0001".into()));
    }

    #[test]
    fn second_lock_holder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.rotation.lock");
        let held = acquire_lock(&path).unwrap();
        assert!(acquire_lock(&path).is_err());
        drop(held);
        assert!(acquire_lock(&path).is_ok());
    }

    #[test]
    fn derive_key_is_reproducible_from_printed_salt() {
        let mut first = Vec::new();
        derive_key("hunter2", None, &mut first).unwrap();
        let first = String::from_utf8(first).unwrap();
        let salt = first.lines().nth(1).unwrap().trim_start_matches("salt: ");

        let mut again = Vec::new();
        derive_key("hunter2", Some(salt), &mut again).unwrap();
        assert_eq!(first, String::from_utf8(again).unwrap());
    }

    #[test]
    fn generated_key_decodes() {
        let mut out = Vec::new();
        generate_key(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(EncryptionKey::from_encoded(text.trim()).is_ok());
    }
}
