use holiday_sync::sqlite::{
    ColumnDefinition, DataType, DefaultValue, Params, Record, Result, RowStore, Schema,
    SqliteConfig, StoreError, TableDefinition, Value,
};
use tempfile::TempDir;

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: String,
    email: String,
    age: Option<i64>,
}

fn users_table() -> TableDefinition {
    TableDefinition::new("users")
        .with_column(
            ColumnDefinition::new("id")
                .of_type(DataType::Integer)
                .primary_key()
                .auto_increment(),
        )
        .with_column(ColumnDefinition::new("name").of_type(DataType::Text).not_null())
        .with_column(
            ColumnDefinition::new("email")
                .of_type(DataType::Text)
                .unique()
                .not_null(),
        )
        .with_column(ColumnDefinition::new("age").of_type(DataType::Integer))
        .with_column(
            ColumnDefinition::new("active")
                .of_type(DataType::Integer)
                .with_default(DefaultValue::Integer(1)),
        )
}

// Helper function to create an in-memory store for testing
fn create_test_db() -> Result<RowStore> {
    let mut store = RowStore::new(SqliteConfig::in_memory(Schema::new().add_table(users_table())));
    store.initialize_schema()?;
    Ok(store)
}

// Helper function to create a temporary file-based store
fn create_temp_db(dir: &TempDir) -> RowStore {
    let path = dir.path().join("nested").join("users.sqlite");
    RowStore::new(SqliteConfig::new(
        path.to_string_lossy().into_owned(),
        Schema::new().add_table(users_table()),
    ))
}

fn user(name: &str, email: &str, age: Option<i64>) -> Params {
    Params::new()
        .with_value("name", name)
        .with_value("email", email)
        .with_value("age", age)
}

fn load_user(store: &mut RowStore, id: i64) -> Result<Option<User>> {
    let record: Option<Record> = store.query_optional(
        "SELECT id, name, email, age FROM users WHERE id = ?",
        &[Value::Integer(id)],
    )?;
    Ok(record.map(|record| User {
        id: record.get("id").and_then(Value::as_integer).unwrap(),
        name: record.get("name").and_then(Value::as_text).unwrap().to_string(),
        email: record.get("email").and_then(Value::as_text).unwrap().to_string(),
        age: record.get("age").and_then(Value::as_integer),
    }))
}

#[test]
fn test_basic_operations() {
    test_basic_operations_impl().unwrap();
}

fn test_basic_operations_impl() -> Result<()> {
    let mut store = create_test_db()?;

    let id = store.insert("users", &user("John Doe", "john@example.com", Some(30)))?;
    assert_eq!(id, 1);

    let loaded = load_user(&mut store, id)?;
    assert_eq!(
        loaded,
        Some(User {
            id: 1,
            name: "John Doe".into(),
            email: "john@example.com".into(),
            age: Some(30),
        })
    );

    let active: i64 =
        store.query_column("SELECT active FROM users WHERE id = ?", &[Value::Integer(id)])?;
    assert_eq!(active, 1);

    let second = store.insert("users", &user("Jane Doe", "jane@example.com", None))?;
    assert_eq!(second, 2);
    assert_eq!(load_user(&mut store, second)?.unwrap().age, None);
    Ok(())
}

#[test]
fn ensure_table_is_idempotent() {
    let mut store = create_test_db().unwrap();
    store.insert("users", &user("A", "a@example.com", None)).unwrap();
    store.initialize_schema().unwrap();
    store.ensure_table(&users_table()).unwrap();
    let count: i64 = store.query_column("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn column_without_name_is_a_schema_error() {
    let mut store = RowStore::new(SqliteConfig::in_memory(Schema::new()));
    let table = TableDefinition::new("broken")
        .with_column(ColumnDefinition::new("id").of_type(DataType::Integer))
        .with_column(ColumnDefinition::new("").of_type(DataType::Text));
    let err = store.ensure_table(&table).unwrap_err();
    assert!(matches!(err, StoreError::Schema(_)), "{err:?}");
    assert!(!store.is_open());
}

#[test]
fn injected_identifiers_are_rejected() {
    let mut store = create_test_db().unwrap();
    let err = store
        .insert("users; DROP TABLE users", &user("A", "a@example.com", None))
        .unwrap_err();
    assert!(matches!(err, StoreError::Schema(_)));

    let fields = Params::new().with_value("name) VALUES ('x'); --", "A");
    assert!(matches!(
        store.insert("users", &fields),
        Err(StoreError::Schema(_))
    ));
}

#[test]
fn duplicate_key_insert_is_an_integrity_error() {
    let mut store = create_test_db().unwrap();
    store.insert("users", &user("A", "same@example.com", None)).unwrap();
    let err = store
        .insert("users", &user("B", "same@example.com", None))
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)), "{err:?}");
}

#[test]
fn upsert_replaces_the_whole_row() {
    let mut store = create_test_db().unwrap();
    let id = store.insert("users", &user("A", "a@example.com", Some(40))).unwrap();

    // `age` is not given, so the replaced row loses it.
    store
        .upsert(
            "users",
            &Params::new()
                .with_value("id", id)
                .with_value("name", "A2")
                .with_value("email", "a@example.com"),
        )
        .unwrap();

    let rows: Vec<Vec<Value>> = store
        .query_all("SELECT id, name, age FROM users", &[])
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![Value::Integer(id), Value::Text("A2".into()), Value::Null]]
    );
}

#[test]
fn upsert_without_collision_behaves_like_insert() {
    let mut store = create_test_db().unwrap();
    store.upsert("users", &user("A", "a@example.com", None)).unwrap();
    store.upsert("users", &user("B", "b@example.com", None)).unwrap();
    let count: i64 = store.query_column("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(count, 2);
}

#[test]
fn query_all_returns_labelled_records_in_order() {
    let mut store = create_test_db().unwrap();
    for (name, email) in [("C", "c@x"), ("A", "a@x"), ("B", "b@x")] {
        store.insert("users", &user(name, email, None)).unwrap();
    }
    let records: Vec<Record> = store
        .query_all("SELECT name, email FROM users ORDER BY name", &[])
        .unwrap();
    let names: Vec<&str> = records
        .iter()
        .map(|r| r.get("name").and_then(Value::as_text).unwrap())
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert_eq!(records[0].columns(), ["name".to_string(), "email".to_string()]);
    assert_eq!(records[0].get("missing"), None);
}

#[test]
fn single_row_queries_enforce_cardinality() {
    let mut store = create_test_db().unwrap();
    let none = "SELECT name FROM users WHERE age > ?";

    let err = store.query_one::<Record>(none, &[Value::Integer(0)]).unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
    let err = store.query_column::<String>(none, &[Value::Integer(0)]).unwrap_err();
    assert!(matches!(err, StoreError::NotFound));

    assert_eq!(
        store
            .query_column_or(none, &[Value::Integer(0)], "nobody".to_string())
            .unwrap(),
        "nobody"
    );
    let fallback = store
        .query_one_or(none, &[Value::Integer(0)], vec![Value::Null])
        .unwrap();
    assert_eq!(fallback, vec![Value::Null]);

    store.insert("users", &user("A", "a@x", Some(20))).unwrap();
    store.insert("users", &user("B", "b@x", Some(30))).unwrap();

    let err = store.query_one::<Record>(none, &[Value::Integer(0)]).unwrap_err();
    assert!(matches!(err, StoreError::AmbiguousResult));
    let err = store
        .query_column_or(none, &[Value::Integer(0)], String::new())
        .unwrap_err();
    assert!(matches!(err, StoreError::AmbiguousResult));

    let one: String = store.query_column(none, &[Value::Integer(25)]).unwrap();
    assert_eq!(one, "B");
}

#[test]
fn column_queries_need_exactly_one_column() {
    let mut store = create_test_db().unwrap();
    let err = store
        .query_column_optional::<String>("SELECT name, email FROM users", &[])
        .unwrap_err();
    assert!(matches!(err, StoreError::ColumnCount { actual: 2 }));
}

#[test]
fn invalid_text_is_an_encoding_error() {
    let mut store = create_test_db().unwrap();
    let err = store
        .query_column::<String>("SELECT CAST(X'FF' AS TEXT)", &[])
        .unwrap_err();
    assert!(matches!(err, StoreError::Encoding(_)), "{err:?}");

    let err = store
        .query_all::<Vec<Value>>("SELECT CAST(X'C328' AS TEXT)", &[])
        .unwrap_err();
    assert!(matches!(err, StoreError::Encoding(_)), "{err:?}");
}

#[test]
fn commit_and_rollback_are_noops_before_first_use() {
    let mut store = RowStore::new(SqliteConfig::in_memory(Schema::new()));
    store.commit().unwrap();
    store.rollback().unwrap();
    assert!(!store.is_open());
}

#[test]
fn rollback_discards_staged_writes() {
    let mut store = create_test_db().unwrap();
    store.insert("users", &user("Kept", "kept@x", None)).unwrap();
    store.commit().unwrap();
    assert!(!store.in_transaction());

    store.insert("users", &user("Dropped", "dropped@x", None)).unwrap();
    assert!(store.in_transaction());
    store.rollback().unwrap();

    let names: Vec<Vec<Value>> = store.query_all("SELECT name FROM users", &[]).unwrap();
    assert_eq!(names, vec![vec![Value::Text("Kept".into())]]);
}

#[test]
fn transaction_commits_on_ok_and_rolls_back_on_err() {
    let mut store = create_test_db().unwrap();

    store
        .transaction(|store| store.insert("users", &user("A", "a@x", None)))
        .unwrap();

    let err = store
        .transaction(|store| {
            store.insert("users", &user("B", "b@x", None))?;
            store.insert("users", &user("C", "a@x", None))
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
    assert!(!store.in_transaction());

    let count: i64 = store.query_column("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn file_store_persists_only_committed_writes() {
    let dir = TempDir::new().unwrap();

    let mut store = create_temp_db(&dir);
    assert!(!store.is_open());
    store.initialize_schema().unwrap();
    store.insert("users", &user("Committed", "c@x", None)).unwrap();
    store.commit().unwrap();
    store.insert("users", &user("Pending", "p@x", None)).unwrap();
    // Dropping with a pending transaction rolls it back.
    drop(store);

    let mut reopened = create_temp_db(&dir);
    let names: Vec<Vec<Value>> = reopened.query_all("SELECT name FROM users", &[]).unwrap();
    assert_eq!(names, vec![vec![Value::Text("Committed".into())]]);

    reopened.insert("users", &user("Closed", "closed@x", None)).unwrap();
    reopened.close().unwrap();

    let mut again = create_temp_db(&dir);
    let count: i64 = again.query_column("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(count, 1);
}
