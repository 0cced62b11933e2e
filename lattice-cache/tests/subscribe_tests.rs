use lattice_cache::{Cache, ROOT_ID, SubscriptionSpec, WriteRequest};
use lattice_types::{CacheConfig, Selection, SelectionField};
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use std::cell::RefCell;
use std::rc::Rc;

fn cache() -> Cache {
    Cache::new(CacheConfig::new())
}

fn data(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn user_fields() -> Selection {
    Selection::new()
        .with("id", SelectionField::scalar("ID", "id"))
        .with("firstName", SelectionField::scalar("String", "firstName"))
}

fn viewer_query() -> Selection {
    Selection::new().with("viewer", SelectionField::object("User", "viewer", user_fields()))
}

type Log = Rc<RefCell<Vec<Option<Value>>>>;

fn spec_for(selection: Selection) -> (Rc<SubscriptionSpec>, Log) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let spec = Rc::new(SubscriptionSpec {
        root_type: "Query".to_string(),
        selection,
        parent_id: None,
        set: Box::new(move |value| sink.borrow_mut().push(value)),
        variables: None,
    });
    (spec, log)
}

#[test]
fn subscriber_hears_about_changes() {
    let mut cache = cache();
    let selection = viewer_query();
    let initial = data(json!({"viewer": {"id": "1", "firstName": "bob"}}));
    cache.write(WriteRequest::new(&selection, &initial)).unwrap();

    let (spec, log) = spec_for(selection.clone());
    cache.subscribe(&spec, &Map::new()).unwrap();

    let updated = data(json!({"viewer": {"id": "1", "firstName": "sally"}}));
    cache.write(WriteRequest::new(&selection, &updated)).unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0],
        Some(json!({"viewer": {"id": "1", "firstName": "sally"}}))
    );
}

#[test]
fn identical_write_does_not_notify() {
    let mut cache = cache();
    let selection = viewer_query();
    let payload = data(json!({"viewer": {"id": "1", "firstName": "bob"}}));
    cache.write(WriteRequest::new(&selection, &payload)).unwrap();

    let (spec, log) = spec_for(selection.clone());
    cache.subscribe(&spec, &Map::new()).unwrap();

    cache.write(WriteRequest::new(&selection, &payload)).unwrap();
    assert!(log.borrow().is_empty());
}

#[test]
fn one_notification_per_write() {
    let mut cache = cache();
    let selection = Selection::new().with(
        "viewer",
        SelectionField::object(
            "User",
            "viewer",
            user_fields().with("lastName", SelectionField::scalar("String", "lastName")),
        ),
    );
    let initial = data(json!({"viewer": {"id": "1", "firstName": "bob", "lastName": "ross"}}));
    cache.write(WriteRequest::new(&selection, &initial)).unwrap();

    let (spec, log) = spec_for(selection.clone());
    cache.subscribe(&spec, &Map::new()).unwrap();

    // two field changes in a single write collapse to one callback
    let updated = data(json!({"viewer": {"id": "1", "firstName": "mary", "lastName": "jane"}}));
    cache.write(WriteRequest::new(&selection, &updated)).unwrap();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn duplicate_paths_increment_the_reference_count() {
    let mut cache = cache();
    let selection = viewer_query().with(
        "buddy",
        SelectionField::object("User", "buddy", user_fields()),
    );
    let payload = data(json!({
        "viewer": {"id": "1", "firstName": "bob"},
        "buddy": {"id": "1", "firstName": "bob"}
    }));
    cache.write(WriteRequest::new(&selection, &payload)).unwrap();

    let (spec, _log) = spec_for(selection);
    cache.subscribe(&spec, &Map::new()).unwrap();

    // one visible subscriber, two registered paths
    assert_eq!(cache.subscriptions().count("User:1", "firstName"), 1);
    assert_eq!(
        cache
            .subscriptions()
            .reference_count("User:1", "firstName", &spec),
        2
    );
}

#[test]
fn unsubscribe_detaches_the_callback() {
    let mut cache = cache();
    let selection = viewer_query();
    let initial = data(json!({"viewer": {"id": "1", "firstName": "bob"}}));
    cache.write(WriteRequest::new(&selection, &initial)).unwrap();

    let (spec, log) = spec_for(selection.clone());
    cache.subscribe(&spec, &Map::new()).unwrap();
    cache.unsubscribe(&spec, &Map::new());

    assert_eq!(cache.subscriptions().count("User:1", "firstName"), 0);
    assert_eq!(cache.subscriptions().count(ROOT_ID, "viewer"), 0);

    let updated = data(json!({"viewer": {"id": "1", "firstName": "sally"}}));
    cache.write(WriteRequest::new(&selection, &updated)).unwrap();
    assert!(log.borrow().is_empty());
}

#[test]
fn link_replacement_notifies_and_releases_old_target() {
    let mut cache = cache();
    let selection = viewer_query();
    let initial = data(json!({"viewer": {"id": "1", "firstName": "bob"}}));
    cache.write(WriteRequest::new(&selection, &initial)).unwrap();

    let (spec, log) = spec_for(selection.clone());
    cache.subscribe(&spec, &Map::new()).unwrap();
    assert_eq!(cache.subscriptions().count("User:1", "firstName"), 1);

    let replacement = data(json!({"viewer": {"id": "2", "firstName": "sally"}}));
    cache.write(WriteRequest::new(&selection, &replacement)).unwrap();

    assert_eq!(log.borrow().len(), 1);
    assert_eq!(
        log.borrow()[0],
        Some(json!({"viewer": {"id": "2", "firstName": "sally"}}))
    );
    // the old target's subtree no longer carries the subscriber
    assert_eq!(cache.subscriptions().count("User:1", "firstName"), 0);
}

#[test]
fn subscription_rooted_at_an_entity() {
    let mut cache = cache();
    let query = viewer_query();
    let initial = data(json!({"viewer": {"id": "1", "firstName": "bob"}}));
    cache.write(WriteRequest::new(&query, &initial)).unwrap();

    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let spec = Rc::new(SubscriptionSpec {
        root_type: "User".to_string(),
        selection: user_fields(),
        parent_id: Some("User:1".to_string()),
        set: Box::new(move |value| sink.borrow_mut().push(value)),
        variables: None,
    });
    cache.subscribe(&spec, &Map::new()).unwrap();

    let update = data(json!({"id": "1", "firstName": "sally"}));
    cache
        .write(WriteRequest::new(&user_fields(), &update).with_parent("User:1"))
        .unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0], Some(json!({"id": "1", "firstName": "sally"})));
}

#[test]
fn variable_bound_spec_reads_with_its_own_variables() {
    let mut cache = cache();
    let selection = Selection::new().with(
        "users",
        SelectionField::object("User", "users(first: $first)", user_fields()),
    );
    let payload = data(json!({"users": [{"id": "1", "firstName": "bob"}]}));
    let variables = data(json!({"first": 5}));
    cache
        .write(WriteRequest::new(&selection, &payload).with_variables(variables.clone()))
        .unwrap();

    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let spec = Rc::new(SubscriptionSpec {
        root_type: "Query".to_string(),
        selection: selection.clone(),
        parent_id: None,
        set: Box::new(move |value| sink.borrow_mut().push(value)),
        variables: Some(Box::new(move || data(json!({"first": 5})))),
    });
    cache.subscribe(&spec, &variables).unwrap();

    let update = data(json!({"users": [{"id": "1", "firstName": "sally"}]}));
    cache
        .write(WriteRequest::new(&selection, &update).with_variables(variables))
        .unwrap();

    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0],
        Some(json!({"users": [{"id": "1", "firstName": "sally"}]}))
    );
}

#[test]
fn cyclic_links_terminate_unsubscription() {
    let mut cache = cache();
    let selection = Selection::new().with(
        "viewer",
        SelectionField::object(
            "User",
            "viewer",
            Selection::new()
                .with("id", SelectionField::scalar("ID", "id"))
                .with(
                    "bestFriend",
                    SelectionField::object(
                        "User",
                        "bestFriend",
                        Selection::new()
                            .with("id", SelectionField::scalar("ID", "id"))
                            .with(
                                "bestFriend",
                                SelectionField::object(
                                    "User",
                                    "bestFriend",
                                    Selection::new()
                                        .with("id", SelectionField::scalar("ID", "id")),
                                ),
                            ),
                    ),
                ),
        ),
    );
    // the user is their own best friend
    let payload = data(json!({
        "viewer": {"id": "1", "bestFriend": {"id": "1", "bestFriend": {"id": "1"}}}
    }));
    cache.write(WriteRequest::new(&selection, &payload)).unwrap();

    let (spec, _log) = spec_for(selection);
    cache.subscribe(&spec, &Map::new()).unwrap();
    cache.unsubscribe(&spec, &Map::new());
    assert_eq!(cache.subscriptions().count(ROOT_ID, "viewer"), 0);
}

#[test]
fn delete_severs_subscriptions() {
    let mut cache = cache();
    let selection = viewer_query();
    let payload = data(json!({"viewer": {"id": "1", "firstName": "bob"}}));
    cache.write(WriteRequest::new(&selection, &payload)).unwrap();

    let (spec, log) = spec_for(selection.clone());
    cache.subscribe(&spec, &Map::new()).unwrap();

    cache.delete("User:1").unwrap();
    assert_eq!(cache.subscriptions().count("User:1", "firstName"), 0);

    // rewriting the old record does not resurrect the callback
    cache.write(WriteRequest::new(&selection, &payload)).unwrap();
    assert!(log.borrow().is_empty());
}
