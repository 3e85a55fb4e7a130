//! Host-side value model
//!
//! Values exchanged with the hosted module. Primitives compare by value;
//! objects, arrays, byte buffers and functions compare by allocation
//! identity, which is what the value table keys on.

use super::guest::Guest;
use super::HostError;
use fhex::ToHex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type ObjectRef = Rc<RefCell<Object>>;
pub type ArrayRef = Rc<RefCell<Array>>;
pub type BytesRef = Rc<RefCell<Vec<u8>>>;

/// Signature of a native callable: `(guest, this, args) -> result`.
///
/// The guest handle lets a function re-enter the module (callback wrappers
/// do this through `resume`).
pub type NativeFn = dyn Fn(&mut dyn Guest, &Value, &[Value]) -> Result<Value, HostError>;

/// A value in the host's object graph
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Symbol(Rc<str>),
    Object(ObjectRef),
    Array(ArrayRef),
    Bytes(BytesRef),
    Function(Rc<Function>),
}

/// Coarse type of a value, following the host language's `typeof` split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    Object,
    Array,
    Bytes,
    Function,
}

impl Kind {
    /// Tag written into the high word of a boxed slot.
    pub fn type_flag(self) -> u32 {
        match self {
            Kind::Object | Kind::Array | Kind::Bytes => 1,
            Kind::String => 2,
            Kind::Symbol => 3,
            Kind::Function => 4,
            Kind::Undefined | Kind::Null | Kind::Boolean | Kind::Number => 0,
        }
    }

    pub fn is_object_like(self) -> bool {
        matches!(self, Kind::Object | Kind::Array | Kind::Bytes | Kind::Function)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Undefined => "undefined",
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Symbol => "symbol",
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Bytes => "Uint8Array",
            Kind::Function => "function",
        };
        f.write_str(name)
    }
}

/// Hashable identity of a value for the reverse id map
///
/// Heap values key on their allocation address; the table keeps every keyed
/// value alive, so an address cannot be reused while its key is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(Rc<str>),
    Symbol(Rc<str>),
    Ref(usize),
}

/// An attribute map with an optional constructor
#[derive(Default)]
pub struct Object {
    attributes: HashMap<String, Value>,
    constructor: Option<Constructor>,
}

/// The callable behind a constructor object, plus the kind it produces
#[derive(Clone)]
pub struct Constructor {
    pub kind: Kind,
    pub function: Rc<Function>,
}

/// Array indexes are below 2^32 - 1; larger keys are plain property names.
pub const MAX_INDEX: usize = u32::MAX as usize;

/// A growable sequence with permissive out-of-range reads
#[derive(Debug, Clone, Default)]
pub struct Array {
    items: Vec<Value>,
}

/// A native callable
pub struct Function {
    name: String,
    body: Box<NativeFn>,
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn symbol(s: impl AsRef<str>) -> Self {
        Value::Symbol(Rc::from(s.as_ref()))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(object.into_ref())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(Array::from(items))))
    }

    pub fn bytes(bytes: Vec<u8>) -> Self {
        Value::Bytes(Rc::new(RefCell::new(bytes)))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Undefined => Kind::Undefined,
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Boolean,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Symbol(_) => Kind::Symbol,
            // constructor objects are callable
            Value::Object(o) if o.borrow().constructor.is_some() => Kind::Function,
            Value::Object(_) => Kind::Object,
            Value::Array(_) => Kind::Array,
            Value::Bytes(_) => Kind::Bytes,
            Value::Function(_) => Kind::Function,
        }
    }

    pub fn type_flag(&self) -> u32 {
        self.kind().type_flag()
    }

    pub fn key(&self) -> ValueKey {
        match self {
            Value::Undefined => ValueKey::Undefined,
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Number(n) => ValueKey::Number(number_key(*n)),
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Symbol(s) => ValueKey::Symbol(s.clone()),
            Value::Object(o) => ValueKey::Ref(Rc::as_ptr(o) as *const () as usize),
            Value::Array(a) => ValueKey::Ref(Rc::as_ptr(a) as *const () as usize),
            Value::Bytes(b) => ValueKey::Ref(Rc::as_ptr(b) as *const () as usize),
            Value::Function(f) => ValueKey::Ref(Rc::as_ptr(f) as *const () as usize),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&BytesRef> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// The function invoked when this value is called.
    ///
    /// Constructor objects are callable through their constructor function.
    pub fn callable(&self) -> Option<Rc<Function>> {
        match self {
            Value::Function(f) => Some(f.clone()),
            Value::Object(o) => o.borrow().constructor.as_ref().map(|c| c.function.clone()),
            _ => None,
        }
    }

    /// Property read with permissive semantics: anything missing is Undefined.
    pub fn get_property(&self, name: &str) -> Value {
        match self {
            Value::Object(o) => o.borrow().get(name),
            Value::Function(f) if name == "name" => Value::string(f.name()),
            _ if name == "length" => self.length().map_or(Value::Undefined, |n| Value::Number(n as f64)),
            _ => Value::Undefined,
        }
    }

    /// Element count of array-like values.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::Array(a) => Some(a.borrow().len()),
            Value::Bytes(b) => Some(b.borrow().len()),
            Value::String(s) => Some(s.encode_utf16().count()),
            Value::Object(o) => match o.borrow().get("length") {
                Value::Number(n) if n >= 0.0 && n.is_finite() => Some(n as usize),
                _ => None,
            },
            _ => None,
        }
    }
}

/// SameValueZero normalisation: all NaNs are one key, and -0 equals 0.
fn number_key(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0
    } else {
        n.to_bits()
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n < 0.0 { "-" } else { "" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

thread_local! {
    /// Arrays whose elements are being joined on this thread
    static JOINING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn join(f: &mut fmt::Formatter<'_>, array: &Array) -> fmt::Result {
    for (i, item) in array.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        if !item.is_nullish() {
            write!(f, "{item}")?;
        }
    }
    Ok(())
}

/// String conversion as the host language performs it for `String(v)`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => f.write_str(s),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Object(o) if o.borrow().constructor.is_some() => {
                let o = o.borrow();
                let name = o.constructor.as_ref().map_or("", |c| c.function.name());
                write!(f, "function {name}() {{ [native code] }}")
            }
            Value::Object(_) => f.write_str("[object Object]"),
            Value::Array(a) => {
                let addr = Rc::as_ptr(a) as *const () as usize;
                // an array already being joined prints as empty
                if JOINING.with(|joining| joining.borrow().contains(&addr)) {
                    return Ok(());
                }
                JOINING.with(|joining| joining.borrow_mut().push(addr));
                let result = join(f, &a.borrow());
                JOINING.with(|joining| joining.borrow_mut().pop());
                result
            }
            Value::Bytes(b) => {
                let b = b.borrow();
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{byte}")?;
                }
                Ok(())
            }
            Value::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({})", n.to_hex()),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s:?})"),
            // attribute names only: the graph may be cyclic
            Value::Object(o) => {
                let o = o.borrow();
                let mut names: Vec<&str> = o.attributes.keys().map(String::as_str).collect();
                names.sort_unstable();
                write!(f, "Object({names:?})")
            }
            Value::Array(a) => write!(f, "Array(len={})", a.borrow().len()),
            Value::Bytes(b) => write!(f, "Bytes({})", hex::encode(&*b.borrow())),
            Value::Function(func) => write!(f, "Function({})", func.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constructor(kind: Kind, function: Rc<Function>) -> Self {
        Object {
            attributes: HashMap::new(),
            constructor: Some(Constructor { kind, function }),
        }
    }

    /// Builder-style attribute insertion
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn into_ref(self) -> ObjectRef {
        Rc::new(RefCell::new(self))
    }

    pub fn get(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Undefined)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::object(object)
    }
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    /// An array of `len` Undefined slots
    ///
    /// # Errors
    /// Throws "Invalid array length" if the slots cannot be allocated.
    pub fn with_len(len: usize) -> Result<Self, HostError> {
        let mut array = Array::new();
        array.grow_to(len)?;
        Ok(array)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Out-of-range reads yield Undefined.
    pub fn get(&self, index: usize) -> Value {
        self.items.get(index).cloned().unwrap_or(Value::Undefined)
    }

    /// Writes past the end grow the array, filling the gap with Undefined.
    ///
    /// # Errors
    /// Throws "Invalid array length" for indexes at or past [`MAX_INDEX`], or
    /// when the array cannot grow that far.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), HostError> {
        if index >= MAX_INDEX {
            return Err(HostError::thrown("Invalid array length"));
        }
        if index >= self.items.len() {
            self.grow_to(index + 1)?;
        }
        self.items[index] = value;
        Ok(())
    }

    fn grow_to(&mut self, len: usize) -> Result<(), HostError> {
        if len > MAX_INDEX {
            return Err(HostError::thrown("Invalid array length"));
        }
        let additional = len.saturating_sub(self.items.len());
        self.items
            .try_reserve_exact(additional)
            .map_err(|_| HostError::thrown("Invalid array length"))?;
        self.items.resize(len, Value::Undefined);
        Ok(())
    }

    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Array { items }
    }
}

impl Function {
    pub fn new<F>(name: impl Into<String>, body: F) -> Rc<Self>
    where
        F: Fn(&mut dyn Guest, &Value, &[Value]) -> Result<Value, HostError> + 'static,
    {
        Rc::new(Function {
            name: name.into(),
            body: Box::new(body),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, guest: &mut dyn Guest, this: &Value, args: &[Value]) -> Result<Value, HostError> {
        (self.body)(guest, this, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish()
    }
}
