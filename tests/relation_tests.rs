#[path = "fixtures.rs"]
mod fixtures;

use entityvalue::relation::{
    check_fks, delete_related, delete_with_cascade, delete_with_related, delete_with_related_strict,
    find_related_fk,
};
use entityvalue::sequence::{MemorySequence, set_sequenced_primary, set_sequenced_secondary};
use entityvalue::{
    EntityContext, EntityDefinition, EntityError, FieldType, FieldValue, MemoryStore, Record, RelatedQuery,
    RelationshipInfo, SchemaProvider, SchemaRegistry, find_related, find_related_count, lifecycle,
};
use fixtures::{Harness, map, text};
use std::collections::HashSet;
use std::sync::Arc;

fn names(items: &[&str]) -> HashSet<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// P1 has two contacts; P2 has a contact and a role.
async fn seed_parties(h: &Harness) {
    for party_id in ["P1", "P2"] {
        h.seed("Party", &[("partyId", text(party_id)), ("name", text(party_id))]).await;
    }
    for (party_id, seq) in [("P1", "01"), ("P1", "02"), ("P2", "01")] {
        h.seed(
            "PartyContact",
            &[("partyId", text(party_id)), ("contactSeq", text(seq)), ("kind", text("EMAIL"))],
        )
        .await;
    }
    h.seed("PartyRole", &[("partyId", text("P2")), ("roleTypeId", text("CUSTOMER"))]).await;
}

#[tokio::test]
async fn test_cascade_deletes_allowed_dependents() {
    let h = Harness::new();
    seed_parties(&h).await;
    let ctx = h.context();

    let mut party = h.load("Party", &[("partyId", text("P1"))]).await;
    delete_with_cascade(&ctx, &mut party, &HashSet::new(), &names(&["PartyContact"]))
        .await
        .unwrap();

    assert!(h.stored("Party", &[("partyId", text("P1"))]).await.is_none());
    let remaining = h.store.rows("PartyContact").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("partyId"), Some(&text("P2")));
}

#[tokio::test]
async fn test_cascade_refuses_unlisted_dependents_before_deleting() {
    let h = Harness::new();
    seed_parties(&h).await;
    let ctx = h.context();

    let mut party = h.load("Party", &[("partyId", text("P2"))]).await;
    let err = delete_with_cascade(&ctx, &mut party, &HashSet::new(), &names(&["PartyContact"]))
        .await
        .unwrap_err();

    match err {
        EntityError::DisallowedCascadeDelete { entity, dependent, .. } => {
            assert_eq!(entity, "Party");
            assert_eq!(dependent, "PartyRole");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.store.op_counts().writes(), 0);
    assert!(h.stored("Party", &[("partyId", text("P2"))]).await.is_some());
    assert_eq!(h.store.row_count("PartyContact").await, 3);
}

#[tokio::test]
async fn test_cascade_cannot_clear_key_fields() {
    let h = Harness::new();
    seed_parties(&h).await;
    let ctx = h.context();

    let mut party = h.load("Party", &[("partyId", text("P2"))]).await;
    let err = delete_with_cascade(
        &ctx,
        &mut party,
        &names(&["PartyRole"]),
        &names(&["PartyContact"]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EntityError::ClearPrimaryKeyField { ref field, .. } if field == "partyId"));
    assert_eq!(h.store.op_counts().writes(), 0);
}

#[tokio::test]
async fn test_cascade_clears_references() {
    let h = Harness::new();
    h.seed("ProductCategory", &[("categoryId", text("TOOLS"))]).await;
    for product_id in ["W1", "W2"] {
        h.seed(
            "Product",
            &[
                ("productId", text(product_id)),
                ("categoryId", text("TOOLS")),
                ("createdBy", text("alice")),
            ],
        )
        .await;
    }
    let ctx = h.context();

    let mut category = h.load("ProductCategory", &[("categoryId", text("TOOLS"))]).await;
    delete_with_cascade(&ctx, &mut category, &names(&["Product"]), &HashSet::new())
        .await
        .unwrap();

    assert_eq!(h.store.row_count("ProductCategory").await, 0);
    for row in h.store.rows("Product").await {
        assert_eq!(row.get("categoryId"), Some(&FieldValue::Null));
        assert_eq!(row.get("createdBy"), Some(&text("alice")));
    }
}

#[tokio::test]
async fn test_delete_with_related_is_all_or_nothing() {
    let h = Harness::new();
    seed_parties(&h).await;
    let ctx = h.context();

    let mut party = h.load("Party", &[("partyId", text("P2"))]).await;
    assert!(!delete_with_related(&ctx, &mut party, &names(&["contacts"])).await.unwrap());
    assert_eq!(h.store.op_counts().writes(), 0);

    let err = delete_with_related_strict(&ctx, &mut party, &names(&["contacts"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EntityError::RelatedRecordsExist { ref relationship, .. } if relationship == "roles"));

    let err = delete_with_related(&ctx, &mut party, &names(&["bogus"])).await.unwrap_err();
    assert!(matches!(err, EntityError::UnknownRelationship { .. }));

    assert!(delete_with_related(&ctx, &mut party, &names(&["contacts", "roles"])).await.unwrap());
    assert!(h.stored("Party", &[("partyId", text("P2"))]).await.is_none());
    assert_eq!(h.store.row_count("PartyRole").await, 0);
    assert_eq!(h.store.row_count("PartyContact").await, 2);
}

#[tokio::test]
async fn test_delete_related_and_counts() {
    let h = Harness::new();
    seed_parties(&h).await;
    let ctx = h.context();

    let party = h.load("Party", &[("partyId", text("P1"))]).await;
    assert_eq!(find_related_count(&ctx, &party, "contacts", false).await.unwrap(), 2);

    let ordered = find_related(
        &ctx,
        &party,
        "contacts",
        &RelatedQuery::new().order_by(vec!["-contactSeq".to_string()]),
    )
    .await
    .unwrap();
    assert_eq!(ordered[0].get("contactSeq").unwrap(), &text("02"));

    assert_eq!(delete_related(&ctx, &party, "contacts").await.unwrap(), 2);
    assert_eq!(find_related_count(&ctx, &party, "contacts", false).await.unwrap(), 0);
    assert!(h.stored("Party", &[("partyId", text("P1"))]).await.is_some());
}

#[tokio::test]
async fn test_find_related_fk_collects_dependents() {
    let h = Harness::new();
    seed_parties(&h).await;
    let ctx = h.context();

    let party = h.load("Party", &[("partyId", text("P2"))]).await;
    let all = find_related_fk(&ctx, &party, &HashSet::new()).await.unwrap();
    assert_eq!(all.len(), 2);

    let contacts_only = find_related_fk(&ctx, &party, &names(&["PartyRole"])).await.unwrap();
    assert_eq!(contacts_only.len(), 1);
    assert_eq!(contacts_only[0].entity_name(), "PartyContact");
}

#[tokio::test]
async fn test_check_fks_inserts_dummy_records() {
    let h = Harness::new();
    let ctx = h.context();

    let mut product = h.record("Product");
    product.set("productId", "W1").unwrap();
    product.set("categoryId", "NEW").unwrap();

    assert!(!check_fks(&ctx, &product, false).await.unwrap());
    assert_eq!(h.store.row_count("ProductCategory").await, 0);

    assert!(!check_fks(&ctx, &product, true).await.unwrap());
    let dummy = h.stored("ProductCategory", &[("categoryId", text("NEW"))]).await.unwrap();
    assert_eq!(dummy.get("description"), Some(&text("Auto-created")));

    assert!(check_fks(&ctx, &product, false).await.unwrap());
    lifecycle::create(&ctx, &mut product).await.unwrap();
}

#[tokio::test]
async fn test_check_fks_skips_dummy_without_key() {
    let h = Harness::new();
    let ctx = h.context();

    let mut product = h.record("Product");
    product.set("productId", "W1").unwrap();
    assert!(!check_fks(&ctx, &product, true).await.unwrap());
    assert_eq!(h.store.row_count("ProductCategory").await, 0);
}

/// Account and AccountProfile each point at the other through the same key.
fn mutual_context() -> (Arc<SchemaRegistry>, Arc<MemoryStore>, EntityContext) {
    let schema = Arc::new(
        SchemaRegistry::new()
            .with(
                EntityDefinition::builder("Account")
                    .pk("accountId", FieldType::Text)
                    .relationship(RelationshipInfo::one("profile", "AccountProfile").key("accountId", "accountId"))
                    .build()
                    .unwrap(),
            )
            .with(
                EntityDefinition::builder("AccountProfile")
                    .pk("accountId", FieldType::Text)
                    .relationship(RelationshipInfo::one("account", "Account").key("accountId", "accountId"))
                    .build()
                    .unwrap(),
            ),
    );
    let store = Arc::new(MemoryStore::new());
    let ctx = EntityContext::new(schema.clone(), store.clone(), store.clone());
    (schema, store, ctx)
}

#[tokio::test]
async fn test_cascade_terminates_on_cyclic_dependents() {
    let (schema, store, ctx) = mutual_context();
    let key = map(&[("accountId", text("A1"))]);
    for entity_name in ["Account", "AccountProfile"] {
        store.seed(&schema.require(entity_name).unwrap(), key.clone()).await;
    }

    let mut account = Record::from_store(schema.require("Account").unwrap(), &key);
    delete_with_cascade(&ctx, &mut account, &HashSet::new(), &names(&["Account", "AccountProfile"]))
        .await
        .unwrap();

    assert_eq!(store.row_count("Account").await, 0);
    assert_eq!(store.row_count("AccountProfile").await, 0);
}

#[tokio::test]
async fn test_check_fks_terminates_on_cyclic_keys() {
    let (schema, store, ctx) = mutual_context();

    let mut account = Record::new(schema.require("Account").unwrap());
    account.set("accountId", "A1").unwrap();
    assert!(!check_fks(&ctx, &account, true).await.unwrap());

    // the dummy profile is created, the account itself is left to the caller
    assert_eq!(store.row_count("AccountProfile").await, 1);
    assert_eq!(store.row_count("Account").await, 0);

    lifecycle::create(&ctx, &mut account).await.unwrap();
    assert!(check_fks(&ctx, &account, false).await.unwrap());
}

#[tokio::test]
async fn test_secondary_sequence_follows_highest_value() {
    let h = Harness::new();
    for seq in ["01", "02", "05"] {
        h.seed("PartyContact", &[("partyId", text("P1")), ("contactSeq", text(seq))]).await;
    }
    h.seed("PartyContact", &[("partyId", text("P2")), ("contactSeq", text("09"))]).await;
    let ctx = h.context();

    let mut contact = h.record("PartyContact");
    contact.set("partyId", "P1").unwrap();
    assert_eq!(set_sequenced_secondary(&ctx, &mut contact).await.unwrap(), "06");
    assert_eq!(contact.get("contactSeq").unwrap(), &text("06"));

    let mut first = h.record("PartyContact");
    first.set("partyId", "P3").unwrap();
    assert_eq!(set_sequenced_secondary(&ctx, &mut first).await.unwrap(), "01");

    let mut single = h.record("Party");
    let err = set_sequenced_secondary(&ctx, &mut single).await.unwrap_err();
    assert!(matches!(err, EntityError::Sequence(_)));
}

#[tokio::test]
async fn test_primary_sequence_from_source() {
    let h = Harness::new();
    let ctx = h.context().with_sequence(Arc::new(MemorySequence::new()));

    let mut first = h.record("Party");
    let mut second = h.record("Party");
    assert_eq!(set_sequenced_primary(&ctx, &mut first).await.unwrap(), "100000");
    assert_eq!(set_sequenced_primary(&ctx, &mut second).await.unwrap(), "100001");
    assert_eq!(second.get("partyId").unwrap(), &text("100001"));

    let unsequenced = h.context();
    let err = set_sequenced_primary(&unsequenced, &mut h.record("Party")).await.unwrap_err();
    assert!(matches!(err, EntityError::Sequence(_)));
}

#[tokio::test]
async fn test_map_round_trip_onto_fresh_record() {
    let h = Harness::new();
    seed_parties(&h).await;

    let original = h.load("Party", &[("partyId", text("P1"))]).await;
    let mut copy = h.record("Party");
    copy.set_all(&original.get_map()).unwrap();

    assert_eq!(copy, original);
    assert_eq!(copy.get_map(), original.get_map());
}
