#![no_main]

use arbitrary::Arbitrary;
use canopy_core::{Error, Operation, Path};
use canopy_runtime::Container;
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Replace { path: Vec<u8>, value: i8 },
    Add { path: Vec<u8>, value: i8 },
    Remove { path: Vec<u8> },
    Move { from: Vec<u8>, to: Vec<u8> },
    Push { path: Vec<u8>, count: u8 },
    Pop { path: Vec<u8> },
    Shift { path: Vec<u8> },
    Unshift { path: Vec<u8>, value: i8 },
    Splice { path: Vec<u8>, start: u8, delete: u8, count: u8 },
}

const KEYS: [&str; 4] = ["a", "b", "list", "-"];

/// Short paths over a small key alphabet, so operations mostly resolve.
fn path(raw: &[u8]) -> Path {
    raw.iter().take(3).fold(Path::root(), |path, &b| {
        if b % 2 == 0 {
            path.join(KEYS[usize::from(b / 2) % KEYS.len()])
        } else {
            path.join_index(usize::from(b / 2) % 4)
        }
    })
}

impl FuzzOp {
    fn to_operation(&self) -> Operation {
        match self {
            FuzzOp::Replace { path: p, value } => Operation::replace(path(p), json!(value)),
            FuzzOp::Add { path: p, value } => Operation::add(path(p), json!({ "v": value })),
            FuzzOp::Remove { path: p } => Operation::remove(path(p)),
            FuzzOp::Move { from, to } => Operation::Move {
                from: path(from),
                path: path(to),
            },
            FuzzOp::Push { path: p, count } => {
                Operation::push(path(p), (0..count % 4).map(|i| json!(i)).collect())
            }
            FuzzOp::Pop { path: p } => Operation::Pop { path: path(p) },
            FuzzOp::Shift { path: p } => Operation::Shift { path: path(p) },
            FuzzOp::Unshift { path: p, value } => Operation::Unshift {
                path: path(p),
                value: vec![json!(value)],
            },
            FuzzOp::Splice {
                path: p,
                start,
                delete,
                count,
            } => Operation::splice(
                path(p),
                usize::from(start % 6),
                usize::from(delete % 4),
                (0..count % 3).map(|i| json!(i)).collect(),
            ),
        }
    }
}

fuzz_target!(|input: Vec<FuzzOp>| {
    let initial = json!({"a": {"b": 1}, "b": [1, 2, 3], "list": [[0], {"a": null}]});
    let cx = Container::new();
    let doc = cx.create_root(initial.clone());
    let operations: Vec<Operation> = input.iter().take(32).map(FuzzOp::to_operation).collect();

    // Any failing prefix must roll back completely.
    let _ = cx.transaction(|cx| {
        for op in &operations {
            let _ = doc.apply(cx, std::slice::from_ref(op));
        }
        Err::<(), _>(Error::user("abort"))
    });
    assert_eq!(doc.get(&cx).expect("root alive"), initial);

    // Committed edits must be undone by their migration.
    let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&log);
    cx.on_migration(doc, move |m| sink.borrow_mut().push(m.clone()));
    cx.transaction(|cx| {
        for op in &operations {
            let _ = doc.apply(cx, std::slice::from_ref(op));
        }
        Ok(())
    })
    .expect("commit");
    let undo: Vec<Operation> = log
        .borrow()
        .first()
        .map(|m| m.undo_operations())
        .unwrap_or_default();
    cx.transaction(|cx| doc.apply(cx, &undo)).expect("undo applies");
    let restored: Value = doc.get(&cx).expect("root alive");
    assert_eq!(restored, initial);
});
