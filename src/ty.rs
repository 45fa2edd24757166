//! Type model and the per-compilation type arena.
//!
//! Types are stored in a [`TypeTable`] and referred to by [`TypeId`].
//! Primitives occupy a fixed prefix of every table, in the order of the
//! static [`PRIMITIVES`] list, so their ids are the same in every
//! compilation. Derived types (pointers, references, arrays, tuples) are
//! interned structurally: asking for `int8*` twice yields the same id.
//! Aggregates are registered per declaration and may start out incomplete.

use std::collections::HashMap;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(usize);

impl TypeId {
  pub const VOID: TypeId = TypeId(0);
  pub const AUTO: TypeId = TypeId(1);
  pub const ADDRESS: TypeId = TypeId(2);

  /// `int<bits>` for `bits` in 8..=256, stepping by 8.
  pub fn int(bits: usize) -> TypeId {
    TypeId(3 + Self::width_index(bits))
  }

  /// `uint<bits>` for `bits` in 8..=256, stepping by 8.
  pub fn uint(bits: usize) -> TypeId {
    TypeId(35 + Self::width_index(bits))
  }

  /// `bytes<len>` for `len` in 1..=32.
  pub fn bytes(len: usize) -> TypeId {
    TypeId(67 + len.clamp(1, 32) - 1)
  }

  fn width_index(bits: usize) -> usize {
    bits.div_ceil(8).clamp(1, 32) - 1
  }
}

/// Type constructors written as a suffix after a type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indirection {
  /// `*`
  Pointer,
  /// `&`
  Reference,
  /// `$`
  Storage,
  /// `@`
  Local,
}

impl Indirection {
  pub fn from_symbol(text: &str) -> Option<Self> {
    match text {
      "*" => Some(Self::Pointer),
      "&" => Some(Self::Reference),
      "$" => Some(Self::Storage),
      "@" => Some(Self::Local),
      _ => None,
    }
  }

  pub fn symbol(self) -> char {
    match self {
      Self::Pointer => '*',
      Self::Reference => '&',
      Self::Storage => '$',
      Self::Local => '@',
    }
  }

  fn code(self) -> char {
    match self {
      Self::Pointer => 'p',
      Self::Reference => 'r',
      Self::Storage => 'c',
      Self::Local => 'l',
    }
  }

  pub fn is_reference(self) -> bool {
    matches!(self, Self::Reference | Self::Local)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
  Contract,
  Packet,
  Struct,
  Union,
}

impl AggregateKind {
  pub fn from_keyword(text: &str) -> Option<Self> {
    match text {
      "contract" => Some(Self::Contract),
      "packet" => Some(Self::Packet),
      "struct" => Some(Self::Struct),
      "union" => Some(Self::Union),
      _ => None,
    }
  }

  pub fn keyword(self) -> &'static str {
    match self {
      Self::Contract => "contract",
      Self::Packet => "packet",
      Self::Struct => "struct",
      Self::Union => "union",
    }
  }

  fn code(self) -> char {
    match self {
      Self::Contract => 'C',
      Self::Packet => 'P',
      Self::Struct => 'S',
      Self::Union => 'U',
    }
  }
}

/// Array dimension: a fixed element count or, for storage arrays, a key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
  Count(usize),
  Key(TypeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
  pub name: String,
  pub ty: TypeId,
  /// Byte offset inside the aggregate.
  pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
  pub kind: AggregateKind,
  pub tag: Option<String>,
  pub attrs: Vec<Attribute>,
  pub defined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  Void,
  Auto,
  Address,
  Integer { signed: bool },
  Bytes,
  Indirect { via: Indirection, deref: TypeId },
  Array { elem: TypeId, dim: Dimension },
  Aggregate(Aggregate),
  Tuple(Vec<TypeId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
  /// Source spelling, e.g. `uint8*` or `packet { uint16; address; }`.
  pub name: String,
  /// Mangled code used in function signatures.
  pub short: String,
  /// Size in bytes.
  pub size: usize,
  pub kind: TypeKind,
}

impl Type {
  fn primitive(name: String, short: String, size: usize, kind: TypeKind) -> Self {
    Self {
      name,
      short,
      size,
      kind,
    }
  }
}

/// Built-in types, in id order.
pub static PRIMITIVES: Lazy<Vec<Type>> = Lazy::new(|| {
  let mut types = vec![
    Type::primitive("void".into(), "v".into(), 0, TypeKind::Void),
    Type::primitive("auto".into(), "o".into(), 32, TypeKind::Auto),
    Type::primitive("address".into(), "a".into(), 20, TypeKind::Address),
  ];
  for signed in [true, false] {
    for bytes in 1..=32 {
      let prefix = if signed { "int" } else { "uint" };
      let code = if signed { 'i' } else { 'u' };
      types.push(Type::primitive(
        format!("{prefix}{}", bytes * 8),
        format!("{code}{bytes}"),
        bytes,
        TypeKind::Integer { signed },
      ));
    }
  }
  for bytes in 1..=32 {
    types.push(Type::primitive(
      format!("bytes{bytes}"),
      format!("b{bytes}"),
      bytes,
      TypeKind::Bytes,
    ));
  }
  types
});

static PRIMITIVE_NAMES: Lazy<HashMap<&'static str, TypeId>> = Lazy::new(|| {
  PRIMITIVES
    .iter()
    .enumerate()
    .map(|(id, ty)| (ty.name.as_str(), TypeId(id)))
    .collect()
});

/// Built-in type named `name`, if any.
pub fn primitive(name: &str) -> Option<TypeId> {
  PRIMITIVE_NAMES.get(name).copied()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
  Indirect(Indirection, TypeId),
  Array(TypeId, Dimension),
  Tuple(Vec<TypeId>),
}

/// Arena owning every type of one compilation.
#[derive(Debug, Clone)]
pub struct TypeTable {
  types: Vec<Type>,
  interned: HashMap<Key, TypeId>,
}

impl Default for TypeTable {
  fn default() -> Self {
    Self::new()
  }
}

impl TypeTable {
  pub fn new() -> Self {
    Self {
      types: PRIMITIVES.clone(),
      interned: HashMap::new(),
    }
  }

  pub fn get(&self, id: TypeId) -> &Type {
    &self.types[id.0]
  }

  pub fn name(&self, id: TypeId) -> &str {
    &self.get(id).name
  }

  pub fn short(&self, id: TypeId) -> &str {
    &self.get(id).short
  }

  pub fn size(&self, id: TypeId) -> usize {
    self.get(id).size
  }

  /// Size rounded up to whole 32-byte words, never less than one word.
  pub fn word_size(&self, id: TypeId) -> usize {
    self.size(id).div_ceil(32).saturating_mul(32).max(32)
  }

  pub fn is_integer(&self, id: TypeId) -> bool {
    matches!(self.get(id).kind, TypeKind::Integer { .. })
  }

  pub fn is_signed(&self, id: TypeId) -> bool {
    matches!(self.get(id).kind, TypeKind::Integer { signed: true })
  }

  pub fn is_unsigned(&self, id: TypeId) -> bool {
    matches!(self.get(id).kind, TypeKind::Integer { signed: false })
  }

  pub fn is_bytes(&self, id: TypeId) -> bool {
    matches!(self.get(id).kind, TypeKind::Bytes)
  }

  /// Pointers and arrays: the types pointer arithmetic applies to.
  pub fn is_pointer(&self, id: TypeId) -> bool {
    matches!(
      self.get(id).kind,
      TypeKind::Indirect {
        via: Indirection::Pointer,
        ..
      } | TypeKind::Array { .. }
    )
  }

  pub fn is_indirect(&self, id: TypeId) -> bool {
    matches!(self.get(id).kind, TypeKind::Indirect { .. })
  }

  pub fn is_tuple(&self, id: TypeId) -> bool {
    matches!(self.get(id).kind, TypeKind::Tuple(_))
  }

  pub fn aggregate(&self, id: TypeId) -> Option<&Aggregate> {
    match &self.get(id).kind {
      TypeKind::Aggregate(aggregate) => Some(aggregate),
      _ => None,
    }
  }

  /// Aggregate declared but never given a body.
  pub fn is_incomplete(&self, id: TypeId) -> bool {
    self.aggregate(id).is_some_and(|a| !a.defined)
  }

  /// Element type of an array, or what a pointer or reference points to.
  pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
    match self.get(id).kind {
      TypeKind::Indirect { deref, .. } => Some(deref),
      TypeKind::Array { elem, .. } => Some(elem),
      _ => None,
    }
  }

  /// Whether `via` may be appended to `base`: nothing follows a reference,
  /// and a pointer can't be turned into a storage pointer.
  pub fn can_indirect(&self, base: TypeId, via: Indirection) -> bool {
    match self.get(base).kind {
      TypeKind::Indirect { via: last, .. } => {
        !(last.is_reference() || (last == Indirection::Pointer && via == Indirection::Storage))
      }
      _ => true,
    }
  }

  pub fn indirect(&mut self, base: TypeId, via: Indirection) -> TypeId {
    let key = Key::Indirect(via, base);
    if let Some(&id) = self.interned.get(&key) {
      return id;
    }
    let inner = self.get(base);
    let ty = Type {
      name: format!("{}{}", inner.name, via.symbol()),
      short: format!("{}{}", via.code(), inner.short),
      size: 32,
      kind: TypeKind::Indirect { via, deref: base },
    };
    self.intern(key, ty)
  }

  /// Array of `elem`; `None` when its byte size doesn't fit a `usize`.
  pub fn array(&mut self, elem: TypeId, dim: Dimension) -> Option<TypeId> {
    let key = Key::Array(elem, dim);
    if let Some(&id) = self.interned.get(&key) {
      return Some(id);
    }
    let inner = self.get(elem);
    let (label, code, size) = match dim {
      Dimension::Count(count) => (
        count.to_string(),
        format!("x{count:x}"),
        inner.size.div_ceil(32).checked_mul(32)?.checked_mul(count)?,
      ),
      Dimension::Key(index) => {
        let index = self.get(index);
        (index.name.clone(), index.short.clone(), 32)
      }
    };
    // Outer dimensions print first: an array of `int8[3]` is `int8[4][3]`.
    let name = match inner.name.find('[') {
      Some(at) if matches!(inner.kind, TypeKind::Array { .. }) => {
        format!("{}[{label}]{}", &inner.name[..at], &inner.name[at..])
      }
      _ => format!("{}[{label}]", inner.name),
    };
    let mangled = format!("{}{code}", inner.short);
    let ty = Type {
      name,
      short: format!("A{}{mangled}", mangled.len()),
      size,
      kind: TypeKind::Array { elem, dim },
    };
    Some(self.intern(key, ty))
  }

  pub fn tuple(&mut self, elems: Vec<TypeId>) -> TypeId {
    let key = Key::Tuple(elems.clone());
    if let Some(&id) = self.interned.get(&key) {
      return id;
    }
    let names: Vec<&str> = elems.iter().map(|&e| self.name(e)).collect();
    let shorts: String = elems.iter().map(|&e| self.short(e)).collect();
    let ty = Type {
      name: format!("({})", names.join(", ")),
      short: format!("L{}{shorts}", elems.len()),
      size: elems.len() * 32,
      kind: TypeKind::Tuple(elems),
    };
    self.intern(key, ty)
  }

  /// Register a named aggregate without a body yet.
  pub fn declare_aggregate(&mut self, kind: AggregateKind, tag: &str) -> TypeId {
    let ty = Type {
      name: format!("{} {tag}", kind.keyword()),
      short: format!("{}{}{tag}", kind.code(), tag.len()),
      size: if kind == AggregateKind::Contract { 32 } else { 0 },
      kind: TypeKind::Aggregate(Aggregate {
        kind,
        tag: Some(tag.to_string()),
        attrs: Vec::new(),
        defined: false,
      }),
    };
    self.push(ty)
  }

  /// Lay out an aggregate body. With `placeholder` the incomplete type
  /// declared earlier is completed in place; otherwise an anonymous type
  /// is created.
  pub fn define_aggregate(
    &mut self,
    kind: AggregateKind,
    placeholder: Option<TypeId>,
    fields: Vec<(String, TypeId)>,
  ) -> Option<TypeId> {
    let mut attrs = Vec::with_capacity(fields.len());
    let mut offset = 0;
    let mut size = 0;
    for (name, ty) in fields {
      let field_size = self.size(ty);
      match kind {
        AggregateKind::Packet => {
          attrs.push(Attribute { name, ty, offset });
          offset = offset.checked_add(field_size)?;
          size = offset;
        }
        AggregateKind::Union => {
          attrs.push(Attribute {
            name,
            ty,
            offset: 0,
          });
          size = size.max(field_size.div_ceil(32).checked_mul(32)?);
        }
        AggregateKind::Struct | AggregateKind::Contract => {
          attrs.push(Attribute { name, ty, offset });
          offset = offset.checked_add(field_size.div_ceil(32).checked_mul(32)?)?;
          size = offset;
        }
      }
    }
    if kind == AggregateKind::Contract {
      size = 32;
    }

    match placeholder {
      Some(id) => {
        let ty = &mut self.types[id.0];
        ty.size = size;
        if let TypeKind::Aggregate(aggregate) = &mut ty.kind {
          aggregate.attrs = attrs;
          aggregate.defined = true;
        }
        Some(id)
      }
      None => {
        let names: String = attrs
          .iter()
          .map(|a| format!("{}; ", self.name(a.ty)))
          .collect();
        let shorts: String = attrs.iter().map(|a| self.short(a.ty)).collect();
        let ty = Type {
          name: format!("{} {{ {names}}}", kind.keyword()),
          short: format!("{}{}{shorts}", kind.code(), attrs.len()),
          size,
          kind: TypeKind::Aggregate(Aggregate {
            kind,
            tag: None,
            attrs,
            defined: true,
          }),
        };
        Some(self.push(ty))
      }
    }
  }

  /// Result type of integer arithmetic: the larger size, signed if either
  /// operand is.
  pub fn merge_integers(&self, left: TypeId, right: TypeId) -> TypeId {
    let size = self.size(left).max(self.size(right));
    if self.is_signed(left) || self.is_signed(right) {
      TypeId::int(size * 8)
    } else {
      TypeId::uint(size * 8)
    }
  }

  /// Number of registered types, primitives included.
  pub fn count(&self) -> usize {
    self.types.len()
  }

  fn intern(&mut self, key: Key, ty: Type) -> TypeId {
    let id = self.push(ty);
    self.interned.insert(key, id);
    id
  }

  fn push(&mut self, ty: Type) -> TypeId {
    self.types.push(ty);
    TypeId(self.types.len() - 1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn primitive_ids_are_fixed() {
    let table = TypeTable::new();
    assert_eq!(table.name(TypeId::VOID), "void");
    assert_eq!(table.name(TypeId::int(8)), "int8");
    assert_eq!(table.name(TypeId::int(256)), "int256");
    assert_eq!(table.name(TypeId::uint(16)), "uint16");
    assert_eq!(table.short(TypeId::uint(16)), "u2");
    assert_eq!(table.name(TypeId::bytes(32)), "bytes32");
    assert_eq!(table.short(TypeId::ADDRESS), "a");
    assert_eq!(primitive("uint256"), Some(TypeId::uint(256)));
    assert_eq!(primitive("int7"), None);
  }

  #[test]
  fn derived_types_are_interned() {
    let mut table = TypeTable::new();
    let p = table.indirect(TypeId::uint(8), Indirection::Pointer);
    assert_eq!(p, table.indirect(TypeId::uint(8), Indirection::Pointer));
    assert_eq!(table.name(p), "uint8*");
    assert_eq!(table.short(p), "pu1");
    assert_eq!(table.size(p), 32);

    let r = table.indirect(TypeId::int(16), Indirection::Reference);
    assert_eq!(table.short(r), "ri2");
    assert!(!table.can_indirect(r, Indirection::Pointer));
    assert!(!table.can_indirect(p, Indirection::Storage));
    assert!(table.can_indirect(p, Indirection::Pointer));
  }

  #[test]
  fn packet_layout_is_tight() {
    let mut table = TypeTable::new();
    let packet = table.define_aggregate(
      AggregateKind::Packet,
      None,
      vec![("a".into(), TypeId::uint(16)), ("b".into(), TypeId::ADDRESS)],
    ).unwrap();
    let ty = table.get(packet);
    assert_eq!(ty.name, "packet { uint16; address; }");
    assert_eq!(ty.short, "P2u2a");
    assert_eq!(ty.size, 22);
    let offsets: Vec<_> = table
      .aggregate(packet)
      .map(|a| a.attrs.iter().map(|f| f.offset).collect())
      .unwrap_or_default();
    assert_eq!(offsets, vec![0, 2]);
  }

  #[test]
  fn struct_fields_take_whole_words() {
    let mut table = TypeTable::new();
    let placeholder = table.declare_aggregate(AggregateKind::Struct, "a");
    assert!(table.is_incomplete(placeholder));
    let done = table.define_aggregate(
      AggregateKind::Struct,
      Some(placeholder),
      vec![("x".into(), TypeId::int(8)), ("y".into(), TypeId::bytes(32))],
    ).unwrap();
    assert_eq!(done, placeholder);
    assert!(!table.is_incomplete(done));
    assert_eq!(table.name(done), "struct a");
    assert_eq!(table.short(done), "S1a");
    assert_eq!(table.size(done), 64);
  }

  #[test]
  fn union_fields_overlap() {
    let mut table = TypeTable::new();
    let union = table.define_aggregate(
      AggregateKind::Union,
      None,
      vec![("x".into(), TypeId::int(8)), ("y".into(), TypeId::ADDRESS)],
    ).unwrap();
    assert_eq!(table.size(union), 32);
    assert!(
      table
        .aggregate(union)
        .is_some_and(|a| a.attrs.iter().all(|f| f.offset == 0))
    );
  }

  #[test]
  fn arrays_and_tuples() {
    let mut table = TypeTable::new();
    let inner = table.array(TypeId::int(32), Dimension::Count(3)).unwrap();
    let outer = table.array(inner, Dimension::Count(4)).unwrap();
    assert_eq!(table.name(inner), "int32[3]");
    assert_eq!(table.short(inner), "A4i4x3");
    assert_eq!(table.name(outer), "int32[4][3]");
    assert_eq!(table.size(outer), 32 * 3 * 4);

    let map = table.array(TypeId::uint(8), Dimension::Key(TypeId::ADDRESS)).unwrap();
    assert_eq!(table.name(map), "uint8[address]");
    assert_eq!(table.size(map), 32);

    let tuple = table.tuple(vec![TypeId::int(8), TypeId::uint(16)]);
    assert_eq!(table.name(tuple), "(int8, uint16)");
    assert_eq!(table.short(tuple), "L2i1u2");
    assert_eq!(table.size(tuple), 64);
  }

  #[test]
  fn oversized_layouts_are_refused() {
    let mut table = TypeTable::new();
    assert_eq!(table.array(TypeId::int(8), Dimension::Count(usize::MAX)), None);
    let inner = table.array(TypeId::int(8), Dimension::Count(1 << 40)).unwrap();
    assert_eq!(table.array(inner, Dimension::Count(1 << 40)), None);

    let half = table.array(TypeId::int(8), Dimension::Count(usize::MAX / 64 + 1)).unwrap();
    let fields = vec![("a".into(), half), ("b".into(), half)];
    assert_eq!(table.define_aggregate(AggregateKind::Struct, None, fields), None);
    assert_eq!(table.word_size(half), table.size(half));
  }

  #[test]
  fn integer_merge_takes_max_size_and_any_sign() {
    let table = TypeTable::new();
    assert_eq!(
      table.merge_integers(TypeId::uint(8), TypeId::int(16)),
      TypeId::int(16)
    );
    assert_eq!(
      table.merge_integers(TypeId::uint(32), TypeId::uint(8)),
      TypeId::uint(32)
    );
    assert_eq!(table.word_size(TypeId::int(8)), 32);
    assert_eq!(table.word_size(TypeId::ADDRESS), 32);
  }
}
