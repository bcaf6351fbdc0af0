mod helpers;

use helpers::test_engine;
use verity::FactError;

/// Push every cache row for `user_id` into the past.
fn expire_cache(engine: &verity::FactEngine, user_id: &str) {
    let db = engine.connection();
    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE fact_cache SET expires_at = 0 WHERE user_id = ?1",
        [user_id],
    )
    .unwrap();
}

#[tokio::test]
async fn expired_rows_fall_through_to_the_store() {
    let engine = test_engine();
    engine
        .extract_and_store_facts("My name is Sarah", None, "u1")
        .await
        .unwrap();
    assert_eq!(engine.get_user_name("u1").await.unwrap(), "Sarah");
    assert_eq!(engine.get_diagnostic_info("u1").await.unwrap().cache_entries, 1);

    expire_cache(&engine, "u1");
    assert_eq!(engine.get_diagnostic_info("u1").await.unwrap().cache_entries, 0);

    // The read is still correct and re-populates the row.
    assert_eq!(engine.get_user_name("u1").await.unwrap(), "Sarah");
    assert_eq!(engine.get_diagnostic_info("u1").await.unwrap().cache_entries, 1);
}

#[tokio::test]
async fn not_found_is_never_cached() {
    let engine = test_engine();
    assert!(matches!(engine.get_user_name("u1").await, Err(FactError::NotFound(_))));
    assert_eq!(engine.get_diagnostic_info("u1").await.unwrap().cache_entries, 0);

    engine
        .extract_and_store_facts("My name is Sarah", None, "u1")
        .await
        .unwrap();
    assert_eq!(engine.get_user_name("u1").await.unwrap(), "Sarah");
}

#[tokio::test]
async fn purge_removes_only_expired_rows() {
    let engine = test_engine();
    for (user, text) in [("u1", "My name is Sarah"), ("u2", "My name is Clemens")] {
        engine.extract_and_store_facts(text, None, user).await.unwrap();
        engine.get_user_name(user).await.unwrap();
        engine.get_pet_names(user).await.unwrap();
    }

    expire_cache(&engine, "u1");
    assert_eq!(engine.purge_expired_cache().await.unwrap(), 2);
    assert_eq!(engine.purge_expired_cache().await.unwrap(), 0);
    assert_eq!(engine.get_diagnostic_info("u2").await.unwrap().cache_entries, 2);
}

#[tokio::test]
async fn forgetting_invalidates_cached_pets() {
    let engine = test_engine();
    engine
        .extract_and_store_facts("I have a dog named Holly", None, "u1")
        .await
        .unwrap();
    assert_eq!(engine.get_pet_names("u1").await.unwrap(), vec!["Holly"]);

    let holly = engine
        .list_entities("u1", verity::facts::types::EntityType::Pet)
        .await
        .unwrap()
        .remove(0);
    engine.forget_entity("u1", &holly.id, None).await.unwrap();

    assert!(engine.get_pet_names("u1").await.unwrap().is_empty());
}
