mod properties;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::dex::assembler::IndexResolver;
use crate::dex::error::DexError;

/// Numbers constants in order of first request. Keys are `pool:text`, for example
/// `string:hi` or `method:LFoo;->bar(I)V`.
#[derive(Default)]
pub(crate) struct TestPool {
    assigned: Mutex<HashMap<String, u32>>,
    fixed: HashMap<String, u32>,
}

impl TestPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pins `key` to `index` regardless of request order.
    pub(crate) fn with_fixed(mut self, key: &str, index: u32) -> Self {
        self.fixed.insert(key.to_string(), index);
        self
    }

    fn lookup(&self, key: String) -> Result<u32, DexError> {
        if let Some(index) = self.fixed.get(&key) {
            return Ok(*index);
        }
        let mut assigned = self.assigned.lock().expect("pool lock");
        let next = assigned.len() as u32;
        Ok(*assigned.entry(key).or_insert(next))
    }
}

impl IndexResolver for TestPool {
    fn string_index(&self, value: &str) -> Result<u32, DexError> {
        self.lookup(format!("string:{}", value))
    }

    fn type_index(&self, descriptor: &str) -> Result<u32, DexError> {
        self.lookup(format!("type:{}", descriptor))
    }

    fn field_index(&self, class: &str, name: &str, descriptor: &str) -> Result<u32, DexError> {
        self.lookup(format!("field:{}->{}:{}", class, name, descriptor))
    }

    fn method_index(&self, class: &str, name: &str, proto: &str) -> Result<u32, DexError> {
        self.lookup(format!("method:{}->{}{}", class, name, proto))
    }

    fn proto_index(&self, proto: &str) -> Result<u32, DexError> {
        self.lookup(format!("proto:{}", proto))
    }

    fn call_site_index(&self, name: &str) -> Result<u32, DexError> {
        self.lookup(format!("call_site:{}", name))
    }

    fn method_handle_index(&self, name: &str) -> Result<u32, DexError> {
        self.lookup(format!("method_handle:{}", name))
    }
}

#[test]
fn pool_numbers_are_stable() {
    let pool = TestPool::new().with_fixed("type:LBig;", 0x10000);
    let a = pool.string_index("a").expect("a");
    let b = pool.type_index("I").expect("I");
    assert_ne!(a, b);
    assert_eq!(pool.string_index("a").expect("a again"), a);
    assert_eq!(pool.type_index("LBig;").expect("fixed"), 0x10000);
}
