//! Lenses and scopes
//!
//! A [`Lens`] addresses a sub-value inside a container: `get` reads it,
//! `set` writes it back and returns a new container. A scope is anything
//! that converts into a lens ([`IntoLens`]): an explicit lens, a field name
//! or an array index over JSON values.
//!
//! Setting a value equal to the one already there returns the container
//! unchanged. Downstream state sources drop repeated values, so this is what
//! keeps a no-op update from propagating around the feedback loop.

use lamina_types::Value;
use serde_json::Map;
use std::fmt;
use std::rc::Rc;

/// Reads an item's identity
pub type KeyFn<T, K> = Rc<dyn Fn(&T) -> K>;

type GetFn<T, R> = Rc<dyn Fn(Option<&T>) -> Option<R>>;
type SetFn<T, R> = Rc<dyn Fn(Option<&T>, Option<R>) -> Option<T>>;

/// A get/set pair addressing an `R` inside a `T`
pub struct Lens<T, R> {
    get: GetFn<T, R>,
    set: SetFn<T, R>,
}

impl<T, R> Clone for Lens<T, R> {
    fn clone(&self) -> Self {
        Lens {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

impl<T, R> fmt::Debug for Lens<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Lens(..)")
    }
}

impl<T: 'static, R: 'static> Lens<T, R> {
    pub fn new(
        get: impl Fn(Option<&T>) -> Option<R> + 'static,
        set: impl Fn(Option<&T>, Option<R>) -> Option<T> + 'static,
    ) -> Self {
        Lens {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    /// Read the addressed value
    pub fn get(&self, outer: Option<&T>) -> Option<R> {
        (self.get)(outer)
    }

    /// Write the addressed value, returning the new container
    pub fn set(&self, outer: Option<&T>, inner: Option<R>) -> Option<T> {
        (self.set)(outer, inner)
    }

    /// Compose with a lens addressing something inside `R`
    pub fn then<U: 'static>(&self, inner: Lens<R, U>) -> Lens<T, U> {
        let outer = self.clone();
        let get_outer = self.clone();
        let get_inner = inner.clone();
        Lens::new(
            move |t: Option<&T>| get_inner.get(get_outer.get(t).as_ref()),
            move |t, u| {
                let middle = outer.get(t);
                outer.set(t, inner.set(middle.as_ref(), u))
            },
        )
    }
}

impl<T: Clone + 'static> Lens<T, T> {
    /// The lens addressing the whole value
    pub fn identity() -> Self {
        Lens::new(|outer: Option<&T>| outer.cloned(), |_, inner| inner)
    }
}

/// Conversion of a scope into a lens
pub trait IntoLens<T, R> {
    fn into_lens(self) -> Lens<T, R>;
}

impl<T, R> IntoLens<T, R> for Lens<T, R> {
    fn into_lens(self) -> Lens<T, R> {
        self
    }
}

impl IntoLens<Value, Value> for &str {
    fn into_lens(self) -> Lens<Value, Value> {
        field(self)
    }
}

impl IntoLens<Value, Value> for String {
    fn into_lens(self) -> Lens<Value, Value> {
        field(self)
    }
}

impl IntoLens<Value, Value> for usize {
    fn into_lens(self) -> Lens<Value, Value> {
        index(self)
    }
}

/// Lens addressing a named field of an object
///
/// Over an array, a numeric name addresses that index.
pub fn field(name: impl Into<String>) -> Lens<Value, Value> {
    let name: Rc<str> = Rc::from(name.into());
    let get_name = name.clone();
    Lens::new(
        move |outer: Option<&Value>| match outer? {
            Value::Object(map) => map.get(&*get_name).cloned(),
            Value::Array(items) => get_name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned()),
            _ => None,
        },
        move |outer, inner| match outer {
            Some(Value::Object(map)) => Some(set_field(map, &name, inner)),
            Some(Value::Array(items)) => match name.parse::<usize>() {
                Ok(i) => Some(set_slot(items, i, inner)),
                Err(_) => Some(Value::Array(items.clone())),
            },
            Some(scalar) => Some(match inner {
                Some(v) => singleton_object(&name, v),
                None => scalar.clone(),
            }),
            None => inner.map(|v| singleton_object(&name, v)),
        },
    )
}

/// Lens addressing a position of an array
///
/// Over an object, the index addresses the field named by its digits.
pub fn index(i: usize) -> Lens<Value, Value> {
    Lens::new(
        move |outer: Option<&Value>| match outer? {
            Value::Array(items) => items.get(i).cloned(),
            Value::Object(map) => map.get(&i.to_string()).cloned(),
            _ => None,
        },
        move |outer, inner| match outer {
            Some(Value::Array(items)) => Some(set_slot(items, i, inner)),
            Some(Value::Object(map)) => Some(set_field(map, &i.to_string(), inner)),
            Some(scalar) => Some(match inner {
                Some(v) => Value::Array(vec![v]),
                None => scalar.clone(),
            }),
            None => inner.map(|v| Value::Array(vec![v])),
        },
    )
}

/// Lens viewing a JSON array as a `Vec` of its items
///
/// Lets an array slot of a JSON state drive a keyed collection.
pub fn array_items() -> Lens<Value, Vec<Value>> {
    Lens::new(
        |outer: Option<&Value>| outer.and_then(Value::as_array).cloned(),
        |outer, inner| match inner {
            Some(items) => Some(Value::Array(items)),
            None => match outer {
                Some(Value::Array(_)) | None => None,
                Some(other) => Some(other.clone()),
            },
        },
    )
}

/// Lens addressing the item with a given key inside a list
///
/// With duplicate keys the last occurrence is addressed, matching the
/// collection's last-wins policy. Setting a key that is not present leaves
/// the list unchanged.
pub fn instance_lens<T, K>(key_of: KeyFn<T, K>, key: K) -> Lens<Vec<T>, T>
where
    T: Clone + PartialEq + 'static,
    K: PartialEq + 'static,
{
    let get_key_of = key_of.clone();
    let get_key = Rc::new(key);
    let set_key = get_key.clone();
    Lens::new(
        move |outer: Option<&Vec<T>>| {
            outer?
                .iter()
                .rev()
                .find(|item| get_key_of(item) == *get_key)
                .cloned()
        },
        move |outer, inner| {
            let Some(items) = outer else {
                return inner.map(|item| vec![item]);
            };
            let Some(n) = items.iter().rposition(|item| key_of(item) == *set_key) else {
                return Some(items.clone());
            };
            if inner.as_ref() == Some(&items[n]) {
                return Some(items.clone());
            }
            let mut next = items.clone();
            match inner {
                Some(item) => next[n] = item,
                None => {
                    next.remove(n);
                }
            }
            Some(next)
        },
    )
}

fn singleton_object(name: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), value);
    Value::Object(map)
}

fn set_field(map: &Map<String, Value>, name: &str, inner: Option<Value>) -> Value {
    if map.get(name) == inner.as_ref() {
        return Value::Object(map.clone());
    }
    let mut next = map.clone();
    match inner {
        Some(v) => {
            next.insert(name.to_string(), v);
        }
        None => {
            next.remove(name);
        }
    }
    Value::Object(next)
}

fn set_slot(items: &[Value], i: usize, inner: Option<Value>) -> Value {
    if items.get(i) == inner.as_ref() {
        return Value::Array(items.to_vec());
    }
    let mut next = items.to_vec();
    match inner {
        Some(v) if i < next.len() => next[i] = v,
        Some(v) => next.push(v),
        None => {
            // Past the end there is nothing to splice out
            if i < next.len() {
                next.remove(i);
            }
        }
    }
    Value::Array(next)
}
