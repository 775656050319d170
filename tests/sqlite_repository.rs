use std::sync::Arc;

use futures::future::join_all;
use rusqlite::{params, Connection};
use rust_table_access::{
    DiagnosticKey, FieldCipher, Row, SqliteConfig, SqliteProvider, TableAccess, TableError,
    TableRepository, TableResult, Value,
};
use tempfile::NamedTempFile;

/// Reversible stand-in for a real cipher: version tag plus reversed text.
struct ReverseCipher;

impl FieldCipher for ReverseCipher {
    fn encrypt(&self, plaintext: &str) -> TableResult<String> {
        Ok(format!("v1:{}", plaintext.chars().rev().collect::<String>()))
    }

    fn decrypt(&self, ciphertext: &str) -> TableResult<String> {
        ciphertext
            .strip_prefix("v1:")
            .map(|body| body.chars().rev().collect())
            .ok_or_else(|| TableError::Cipher("unknown ciphertext version".to_string()))
    }
}

// Initialize the database schema
fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE usuarios (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT,
            age INTEGER
        );
        CREATE INDEX idx_usuarios_email ON usuarios(email);
        "#,
    )
}

// Helper function to create an in-memory repository for testing
fn create_test_repo() -> TableRepository {
    let conn = Connection::open_in_memory().unwrap();
    initialize_schema(&conn).unwrap();
    TableRepository::new(Arc::new(SqliteProvider::from_connection(conn)))
        .with_cipher(Arc::new(ReverseCipher))
}

// Helper function to create a repository over a temporary database file
fn create_temp_repo() -> (TableRepository, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let conn = Connection::open(temp_file.path()).unwrap();
        initialize_schema(&conn).unwrap();
    }
    let provider = SqliteProvider::open(&SqliteConfig::new(temp_file.path())).unwrap();
    (TableRepository::new(Arc::new(provider)), temp_file)
}

fn juan() -> Row {
    Row::new()
        .with_value("id", 1)
        .with_value("name", "Juan")
        .with_value("email", "juan@test.com")
}

#[tokio::test]
async fn test_basic_operations() {
    let repo = create_test_repo();

    assert!(repo.create("usuarios", None, &juan(), None).await.unwrap());

    let rows = repo
        .fetch_by_key("usuarios", None, "id", Value::from(1))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("Juan")));
    assert_eq!(rows[0].get("age"), Some(&Value::Null));

    let changed = repo
        .update(
            "usuarios",
            None,
            "id",
            Value::from(1),
            &Row::new().with_value("age", 31),
            None,
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let rows = repo.fetch_rows("usuarios", None, None).await.unwrap();
    assert_eq!(rows[0].get("age"), Some(&Value::Integer(31)));

    let deleted = repo
        .delete("usuarios", None, "id", Value::from(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(repo
        .fetch_by_key("usuarios", None, "id", Value::from(1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn encrypted_field_is_stored_as_ciphertext() {
    let repo = create_test_repo();
    repo.create("usuarios", None, &juan(), Some("email"))
        .await
        .unwrap();

    // Text key against an INTEGER column still matches.
    let raw = repo
        .fetch_by_key("usuarios", None, "id", Value::from("1"))
        .await
        .unwrap();
    assert_eq!(raw.len(), 1);
    let stored = raw[0].get("email").unwrap();
    assert_ne!(stored, &Value::from("juan@test.com"));
    assert_eq!(raw[0].get("name"), Some(&Value::from("Juan")));

    let decrypted = repo
        .fetch_by_key_decrypted("usuarios", None, "id", Value::from("1"), Some("email"))
        .await
        .unwrap();
    assert_eq!(decrypted[0].get("email"), Some(&Value::from("juan@test.com")));
}

#[tokio::test]
async fn update_encrypts_named_fields() {
    let repo = create_test_repo();
    repo.create("usuarios", None, &juan(), None).await.unwrap();
    repo.update(
        "usuarios",
        None,
        "id",
        Value::from(1),
        &Row::new().with_value("email", "nuevo@test.com"),
        Some("email"),
    )
    .await
    .unwrap();

    let rows = repo
        .fetch_rows_decrypted("usuarios", None, Some(10), Some("email"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("email"), Some(&Value::from("nuevo@test.com")));
}

#[tokio::test]
async fn unbounded_read_is_capped_at_default_limit() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE eventos (id INTEGER PRIMARY KEY, payload TEXT);")
        .unwrap();
    for id in 0..1005 {
        conn.execute(
            "INSERT INTO eventos (id, payload) VALUES (?1, ?2)",
            params![id, "x"],
        )
        .unwrap();
    }
    let repo = TableRepository::new(Arc::new(SqliteProvider::from_connection(conn)));

    assert_eq!(repo.fetch_rows("eventos", None, None).await.unwrap().len(), 1000);
    assert_eq!(repo.fetch_rows("eventos", None, Some(3)).await.unwrap().len(), 3);
    assert_eq!(
        repo.fetch_rows("eventos", Some("main"), Some(2000))
            .await
            .unwrap()
            .len(),
        1005
    );
}

#[tokio::test]
async fn non_matching_key_is_not_an_error() {
    let repo = create_test_repo();
    let row = Row::new().with_value("name", "Nadie");
    assert_eq!(
        repo.update("usuarios", None, "id", Value::from(99), &row, None)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        repo.delete("usuarios", None, "id", Value::from(99))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn password_hash_lookup() {
    let repo = create_test_repo();
    let user = juan().with_value("password_hash", "$argon2id$v=19$abc");
    repo.create("usuarios", None, &user, None).await.unwrap();

    let hash = repo
        .fetch_password_hash(
            "usuarios",
            None,
            "email",
            "password_hash",
            Value::from("juan@test.com"),
        )
        .await
        .unwrap();
    assert_eq!(hash.as_deref(), Some("$argon2id$v=19$abc"));

    let missing = repo
        .fetch_password_hash(
            "usuarios",
            None,
            "email",
            "password_hash",
            Value::from("ghost@test.com"),
        )
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn engine_errors_are_classified() {
    let repo = create_test_repo();
    repo.create("usuarios", None, &juan(), None).await.unwrap();

    let duplicate = repo.create("usuarios", None, &juan(), None).await.unwrap_err();
    assert!(matches!(duplicate, TableError::Conflict(_)));

    let missing = repo.fetch_rows("no_existe", None, None).await.unwrap_err();
    assert!(matches!(missing, TableError::NotFound(_)));

    let bad_column = repo
        .fetch_by_key("usuarios", None, "no_column", Value::from(1))
        .await
        .unwrap_err();
    assert!(matches!(bad_column, TableError::InvalidArgument(_)));
}

#[tokio::test]
async fn hostile_identifiers_never_reach_the_engine() {
    let repo = create_test_repo();
    let err = repo
        .fetch_rows("usuarios; DROP TABLE usuarios", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::InvalidArgument(_)));

    // Values are bound, so quotes inside data are just data.
    let row = juan().with_value("name", "Robert'); DROP TABLE usuarios;--");
    repo.create("usuarios", None, &row, None).await.unwrap();
    assert_eq!(repo.fetch_rows("usuarios", None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn diagnostics_report_sqlite_metadata() {
    let (repo, temp_file) = create_temp_repo();
    let info = repo.fetch_diagnostics().await.unwrap();

    assert_eq!(info.get(DiagnosticKey::Provider), Some("SQLite"));
    assert!(info.get(DiagnosticKey::Version).is_some());
    let database = info.get(DiagnosticKey::Database).unwrap();
    assert!(database.ends_with(
        temp_file
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
    ));
    assert_eq!(info.get(DiagnosticKey::Port), None);
}

#[tokio::test]
async fn concurrent_writes_are_independent() {
    let (repo, _temp_file) = create_temp_repo();
    let rows: Vec<Row> = (1..=20)
        .map(|id| {
            Row::new()
                .with_value("id", id)
                .with_value("name", format!("user{id}"))
                .with_value("email", format!("user{id}@test.com"))
        })
        .collect();

    let results = join_all(rows.iter().map(|row| repo.create("usuarios", None, row, None))).await;
    assert!(results.into_iter().all(|result| result.unwrap()));
    assert_eq!(repo.fetch_rows("usuarios", None, None).await.unwrap().len(), 20);
}
