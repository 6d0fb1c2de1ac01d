//! Integration tests for a full state loop with a keyed collection

use lamina_state::{
    array_items, field, isolate_sink, onionify, ChildSources, Collection, Reducer, Selector, SinkBundle,
    StateConfig, StateSource,
};
use lamina_stream::Stream;
use lamina_types::{Key, Value};
use serde_json::json;

struct Todo {
    view: Stream<String>,
    toggle: Stream<()>,
    remove: Stream<()>,
    reducers: Stream<Reducer<Value>>,
}

impl SinkBundle<Value> for Todo {
    fn reducers(&self) -> Option<Stream<Reducer<Value>>> {
        Some(self.reducers.clone())
    }
}

fn label(item: &Value) -> String {
    let title = item["title"].as_str().unwrap_or_default();
    if item["done"].as_bool().unwrap_or(false) {
        format!("{title} (done)")
    } else {
        title.to_string()
    }
}

fn flip_done(item: &Value) -> Value {
    let mut item = item.clone();
    let done = item["done"].as_bool().unwrap_or(false);
    item["done"] = json!(!done);
    item
}

fn default_done(item: &Value) -> Value {
    let mut item = item.clone();
    if item.get("done").is_none() {
        item["done"] = json!(false);
    }
    item
}

/// Build a todo item component, optionally filling in `done` when it starts
fn todo(sources: ChildSources<Value, Key, bool>) -> Todo {
    let toggle: Stream<()> = Stream::create();
    let remove: Stream<()> = Stream::create();

    let mut reducers = vec![
        toggle.map(|_| Reducer::update(flip_done)),
        remove.map_to(Reducer::remove()),
    ];
    if sources.host {
        reducers.push(Stream::of(Reducer::update(default_done)));
    }

    Todo {
        view: sources.state.stream().map(|item: Value| label(&item)),
        toggle,
        remove,
        reducers: Stream::merge(reducers),
    }
}

struct App {
    view: Stream<Vec<String>>,
    adds: Stream<(i64, String)>,
    collection: Collection<Value, Key, Todo>,
    reducers: Stream<Reducer<Value>>,
}

impl SinkBundle<Value> for App {
    fn reducers(&self) -> Option<Stream<Reducer<Value>>> {
        Some(self.reducers.clone())
    }
}

fn app(initial: Value, fill_defaults: bool) -> impl FnOnce(StateSource<Value>) -> App {
    move |state: StateSource<Value>| {
        let todos = field("todos").then(array_items());
        let collection = state.select(todos.clone()).as_collection(todo, fill_defaults);
        let view = collection.pick_combine(Selector::new("view", |t: &Todo| Some(t.view.clone())));

        let adds: Stream<(i64, String)> = Stream::create();
        let add_reducers = adds.map(|(key, title): (i64, String)| {
            Reducer::update(move |root: &Value| {
                let mut root = root.clone();
                if let Some(list) = root["todos"].as_array_mut() {
                    list.push(json!({"key": key, "title": title.clone()}));
                }
                root
            })
        });

        let reducers = Stream::merge(vec![
            Stream::of(Reducer::init(initial)),
            add_reducers,
            isolate_sink(&collection.reducers(), todos),
        ]);

        App {
            view,
            adds,
            collection,
            reducers,
        }
    }
}

fn todo_sinks(app: &App, key: i64) -> Option<std::rc::Rc<Todo>> {
    let snapshot = app.collection.instances().last()?;
    snapshot.get(&Key::from(key)).map(|entry| entry.sinks().clone())
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_todo_loop() {
    let initial = json!({"todos": [
        {"key": 1, "title": "a"},
        {"key": 2, "title": "b"},
    ]});
    let onion = onionify(&StateConfig::default(), app(initial, false)).unwrap();
    let (views, _sub) = onion.sinks.view.collect();
    assert_eq!(views.values(), vec![strings(&["a", "b"])]);

    let (snapshots, _snapshots_sub) = onion.sinks.collection.instances().collect();

    todo_sinks(&onion.sinks, 1).unwrap().toggle.send_next(());
    assert_eq!(views.last(), Some(strings(&["a (done)", "b"])));

    todo_sinks(&onion.sinks, 2).unwrap().remove.send_next(());
    assert_eq!(views.last(), Some(strings(&["a (done)"])));
    assert_eq!(snapshots.last().unwrap().removed_keys(), vec![Key::from(2)]);
    assert!(todo_sinks(&onion.sinks, 2).is_none());

    assert_eq!(
        onion.state.current(),
        Some(json!({"todos": [{"key": 1, "title": "a", "done": true}]}))
    );
}

#[test]
fn test_child_reducers_emitted_during_reconciliation_are_applied() {
    let initial = json!({"todos": [{"key": 1, "title": "a"}]});
    let onion = onionify(&StateConfig::default(), app(initial, true)).unwrap();
    let (views, _sub) = onion.sinks.view.collect();

    assert_eq!(
        onion.state.current(),
        Some(json!({"todos": [{"key": 1, "title": "a", "done": false}]}))
    );

    onion.sinks.adds.send_next((2, "c".to_string()));

    assert_eq!(views.last(), Some(strings(&["a", "c"])));
    assert_eq!(
        onion.state.current(),
        Some(json!({"todos": [
            {"key": 1, "title": "a", "done": false},
            {"key": 2, "title": "c", "done": false},
        ]}))
    );

    let metrics = onion.sinks.collection.metrics();
    assert_eq!(metrics.instantiated, 2);
    assert_eq!(metrics.item_updates, 2);
    assert_eq!(metrics.snapshots, 4);
}

#[test]
fn test_removing_every_todo_leaves_an_empty_list() {
    let initial = json!({"todos": [{"key": "x", "title": "only"}]});
    let onion = onionify(&StateConfig::default(), app(initial, false)).unwrap();
    let (views, _sub) = onion.sinks.view.collect();

    let snapshot = onion.sinks.collection.instances().last().unwrap();
    snapshot.get(&Key::from("x")).unwrap().sinks().remove.send_next(());

    assert_eq!(views.last(), Some(Vec::new()));
    assert_eq!(onion.state.current(), Some(json!({"todos": []})));
}
