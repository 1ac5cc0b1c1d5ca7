//! UCI option registry: typed parameters with synchronous change observers.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use parking_lot::Mutex;

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Check(bool),
    Spin(i64),
    Combo(String),
    Button,
    Str(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> bool {
        matches!(self, OptionValue::Check(true))
    }

    pub fn as_int(&self) -> i64 {
        match self {
            OptionValue::Spin(v) => *v,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OptionValue::Str(s) | OptionValue::Combo(s) => s,
            _ => "",
        }
    }
}

type Observer = Box<dyn FnMut(&OptionValue) + Send>;

struct Param {
    name: String,
    value: OptionValue,
    default: OptionValue,
    min: i64,
    max: i64,
    choices: Vec<String>,
    observers: Vec<(u64, Observer)>,
}

/// The registry. Observers are invoked synchronously while the registry lock
/// is held, so they must not call back into `set`.
pub struct OptionRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    params: BTreeMap<String, Param>,
    next_token: u64,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Default for OptionRegistry {
    fn default() -> Self {
        OptionRegistry::new()
    }
}

impl OptionRegistry {
    pub fn new() -> OptionRegistry {
        OptionRegistry { inner: Mutex::new(Inner { params: BTreeMap::new(), next_token: 1 }) }
    }

    fn add(&self, name: &str, value: OptionValue, min: i64, max: i64, choices: Vec<String>) {
        self.inner.lock().params.insert(
            key(name),
            Param {
                name: name.to_string(),
                default: value.clone(),
                value,
                min,
                max,
                choices,
                observers: Vec::new(),
            },
        );
    }

    pub fn add_check(&self, name: &str, default: bool) {
        self.add(name, OptionValue::Check(default), 0, 0, Vec::new());
    }

    pub fn add_spin(&self, name: &str, default: i64, min: i64, max: i64) {
        self.add(name, OptionValue::Spin(default), min, max, Vec::new());
    }

    pub fn add_combo(&self, name: &str, default: &str, choices: &[&str]) {
        self.add(
            name,
            OptionValue::Combo(default.to_string()),
            0,
            0,
            choices.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn add_button(&self, name: &str) {
        self.add(name, OptionValue::Button, 0, 0, Vec::new());
    }

    pub fn add_string(&self, name: &str, default: &str) {
        self.add(name, OptionValue::Str(default.to_string()), 0, 0, Vec::new());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().params.contains_key(&key(name))
    }

    pub fn get(&self, name: &str) -> Option<OptionValue> {
        self.inner.lock().params.get(&key(name)).map(|p| p.value.clone())
    }

    pub fn get_int(&self, name: &str) -> i64 {
        self.get(name).map_or(0, |v| v.as_int())
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v.as_bool())
    }

    pub fn get_string(&self, name: &str) -> String {
        self.get(name).map_or(String::new(), |v| v.as_str().to_string())
    }

    /// Register a change observer; returns a token for removal. The observer
    /// runs under the registry lock on every successful `set`.
    pub fn add_observer(&self, name: &str, f: Observer) -> Option<u64> {
        let mut b = self.inner.lock();
        let token = b.next_token;
        b.next_token += 1;
        b.params.get_mut(&key(name))?.observers.push((token, f));
        Some(token)
    }

    pub fn remove_observer(&self, name: &str, token: u64) {
        let mut b = self.inner.lock();
        if let Some(p) = b.params.get_mut(&key(name)) {
            p.observers.retain(|(t, _)| *t != token);
        }
    }

    /// Set an option from protocol text. The UCI placeholder `<empty>`
    /// clears string options. Returns false for unknown names or unparsable
    /// values.
    pub fn set(&self, name: &str, raw_value: Option<&str>) -> bool {
        let mut b = self.inner.lock();
        let Some(p) = b.params.get_mut(&key(name)) else {
            return false;
        };
        let new_value = match (&p.default, raw_value) {
            (OptionValue::Button, _) => OptionValue::Button,
            (OptionValue::Check(_), Some(v)) => match v {
                "true" => OptionValue::Check(true),
                "false" => OptionValue::Check(false),
                _ => return false,
            },
            (OptionValue::Spin(_), Some(v)) => match v.parse::<i64>() {
                Ok(n) if n >= p.min && n <= p.max => OptionValue::Spin(n),
                _ => return false,
            },
            (OptionValue::Combo(_), Some(v)) => {
                if p.choices.iter().any(|c| c.eq_ignore_ascii_case(v)) {
                    OptionValue::Combo(v.to_string())
                } else {
                    return false;
                }
            }
            (OptionValue::Str(_), v) => {
                let s = v.unwrap_or("");
                OptionValue::Str(if s == "<empty>" { String::new() } else { s.to_string() })
            }
            (_, None) => return false,
        };
        p.value = new_value;
        let value = p.value.clone();
        for (_, obs) in p.observers.iter_mut() {
            obs(&value);
        }
        true
    }

    /// Render the `option name ...` block for the `uci` handshake.
    pub fn describe_all(&self) -> String {
        let b = self.inner.lock();
        let mut out = String::new();
        for p in b.params.values() {
            match &p.default {
                OptionValue::Check(d) => {
                    let _ = writeln!(out, "option name {} type check default {d}", p.name);
                }
                OptionValue::Spin(d) => {
                    let _ = writeln!(
                        out,
                        "option name {} type spin default {d} min {} max {}",
                        p.name, p.min, p.max
                    );
                }
                OptionValue::Combo(d) => {
                    let vars: String = p.choices.iter().map(|c| format!(" var {c}")).collect();
                    let _ = writeln!(out, "option name {} type combo default {d}{vars}", p.name);
                }
                OptionValue::Button => {
                    let _ = writeln!(out, "option name {} type button", p.name);
                }
                OptionValue::Str(d) => {
                    let d = if d.is_empty() { "<empty>" } else { d };
                    let _ = writeln!(out, "option name {} type string default {d}", p.name);
                }
            }
        }
        out
    }
}

/// The engine's option set with its defaults.
pub fn default_options() -> OptionRegistry {
    let r = OptionRegistry::new();
    r.add_spin("Threads", 1, 1, 512);
    r.add_spin("Hash", 16, 0, 1 << 20);
    r.add_button("Clear Hash");
    r.add_spin("MultiPV", 1, 1, 256);
    r.add_check("Ponder", false);
    r.add_check("OwnBook", false);
    r.add_check("AnalyseMode", false);
    r.add_spin("MinProbeDepth", 0, 0, 100);
    r.add_spin("Strength", 1000, 0, 1000);
    r.add_check("AnalysisAgeHash", true);
    r.add_string("GaviotaTbPath", "");
    r.add_spin("GaviotaTbCache", 16, 1, 2047);
    r.add_string("SyzygyPath", "");
    r.add_string("EvalFile", "");
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn registry() -> OptionRegistry {
        let r = OptionRegistry::new();
        r.add_spin("Hash", 16, 0, 65536);
        r.add_check("Ponder", false);
        r.add_button("Clear Hash");
        r.add_string("SyzygyPath", "");
        r.add_combo("Style", "normal", &["normal", "wild"]);
        r
    }

    #[test]
    fn set_and_get_typed_values() {
        let r = registry();
        assert!(r.set("Hash", Some("64")));
        assert_eq!(r.get_int("Hash"), 64);
        assert!(!r.set("Hash", Some("999999")));
        assert!(!r.set("Hash", Some("a lot")));
        assert!(r.set("Ponder", Some("true")));
        assert!(r.get_bool("Ponder"));
        assert!(r.set("SyzygyPath", Some("/tb")));
        assert_eq!(r.get_string("SyzygyPath"), "/tb");
        assert!(r.set("SyzygyPath", Some("<empty>")));
        assert_eq!(r.get_string("SyzygyPath"), "");
        assert!(!r.set("NoSuchOption", Some("1")));
        assert!(!r.set("Style", Some("bogus")));
        assert!(r.set("Style", Some("wild")));
    }

    #[test]
    fn names_are_case_insensitive() {
        let r = registry();
        assert!(r.set("hash", Some("32")));
        assert_eq!(r.get_int("HASH"), 32);
    }

    #[test]
    fn observers_fire_and_can_be_removed() {
        let r = registry();
        let seen = Arc::new(AtomicI64::new(0));
        let seen2 = seen.clone();
        let token = r
            .add_observer(
                "Hash",
                Box::new(move |v| {
                    seen2.store(v.as_int(), Ordering::SeqCst);
                }),
            )
            .unwrap();
        r.set("Hash", Some("128"));
        assert_eq!(seen.load(Ordering::SeqCst), 128);
        r.remove_observer("Hash", token);
        r.set("Hash", Some("256"));
        assert_eq!(seen.load(Ordering::SeqCst), 128);
    }

    #[test]
    fn button_presses_reach_observers() {
        let r = registry();
        let hits = Arc::new(AtomicI64::new(0));
        let hits2 = hits.clone();
        r.add_observer("Clear Hash", Box::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        r.set("Clear Hash", None);
        r.set("Clear Hash", None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn describe_lists_everything() {
        let r = registry();
        let d = r.describe_all();
        assert!(d.contains("option name Hash type spin default 16 min 0 max 65536"));
        assert!(d.contains("option name Ponder type check default false"));
        assert!(d.contains("option name Clear Hash type button"));
        assert!(d.contains("option name SyzygyPath type string default <empty>"));
        assert!(d.contains("option name Style type combo default normal var normal var wild"));
    }
}
