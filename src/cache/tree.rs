//! Value Tree Module
//!
//! Serializes typed values into a `serde_json::Value` while optionally leaving
//! out struct fields that are `None`. Map entries, sequence slots and values
//! that serialize to null for any other reason are always kept, so the tree
//! deserializes back into the original type.

use serde::ser::{self, Error as _, Impossible, Serialize, Serializer as _};
use serde_json::{Error, Map, Number, Value};

/// Serializes `value`, skipping `None` struct fields when `skip_none_fields`.
pub(crate) fn to_tree<T>(value: &T, skip_none_fields: bool) -> Result<Value, Error>
where
    T: Serialize + ?Sized,
{
    value.serialize(TreeSerializer { skip_none_fields })
}

#[derive(Clone, Copy)]
struct TreeSerializer {
    skip_none_fields: bool,
}

impl ser::Serializer for TreeSerializer {
    type Ok = Value;
    type Error = Error;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = SeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = MapBuilder;

    fn serialize_bool(self, v: bool) -> Result<Value, Error> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, Error> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, Error> {
        if let Ok(v) = i64::try_from(v) {
            return self.serialize_i64(v);
        }
        u64::try_from(v)
            .map(|v| Value::Number(v.into()))
            .map_err(|_| Error::custom("number out of range"))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, Error> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, Error> {
        u64::try_from(v)
            .map(|v| Value::Number(v.into()))
            .map_err(|_| Error::custom("number out of range"))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, Error> {
        Ok(Value::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, Error> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn serialize_char(self, v: char) -> Result<Value, Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, Error> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, Error> {
        Ok(Value::Array(v.iter().map(|b| Value::from(*b)).collect()))
    }

    fn serialize_none(self) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Value, Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, Error> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value, Error> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Value, Error>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, Error>
    where
        T: Serialize + ?Sized,
    {
        let mut tagged = Map::new();
        tagged.insert(variant.to_string(), value.serialize(self)?);
        Ok(Value::Object(tagged))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder, Error> {
        Ok(SeqBuilder {
            options: self,
            variant: None,
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder, Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqBuilder, Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, Error> {
        let mut builder = self.serialize_seq(Some(len))?;
        builder.variant = Some(variant);
        Ok(builder)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder, Error> {
        Ok(MapBuilder {
            options: self,
            variant: None,
            entries: Map::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapBuilder, Error> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<MapBuilder, Error> {
        let mut builder = self.serialize_map(Some(len))?;
        builder.variant = Some(variant);
        Ok(builder)
    }
}

/// Wraps `inner` as `{variant: inner}` for externally tagged enum variants.
fn tag(variant: Option<&'static str>, inner: Value) -> Value {
    match variant {
        Some(variant) => {
            let mut tagged = Map::new();
            tagged.insert(variant.to_string(), inner);
            Value::Object(tagged)
        }
        None => inner,
    }
}

// == Sequences ==
struct SeqBuilder {
    options: TreeSerializer,
    variant: Option<&'static str>,
    items: Vec<Value>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.items.push(value.serialize(self.options)?);
        Ok(())
    }

    fn end(self) -> Result<Value, Error> {
        Ok(tag(self.variant, Value::Array(self.items)))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, Error> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, Error> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleVariant for SeqBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, Error> {
        ser::SerializeSeq::end(self)
    }
}

// == Maps and Structs ==
struct MapBuilder {
    options: TreeSerializer,
    variant: Option<&'static str>,
    entries: Map<String, Value>,
    pending_key: Option<String>,
}

impl MapBuilder {
    fn insert_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        if self.options.skip_none_fields && is_none(value) {
            return Ok(());
        }
        let value = value.serialize(self.options)?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn finish(self) -> Value {
        tag(self.variant, Value::Object(self.entries))
    }
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let key = match key.serialize(self.options)? {
            Value::String(key) => key,
            Value::Number(key) => key.to_string(),
            Value::Bool(key) => key.to_string(),
            _ => return Err(Error::custom("key must be a string")),
        };
        self.pending_key = Some(key);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| Error::custom("map value serialized before its key"))?;
        let value = value.serialize(self.options)?;
        self.entries.insert(key, value);
        Ok(())
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.insert_field(key, value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for MapBuilder {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        self.insert_field(key, value)
    }

    fn end(self) -> Result<Value, Error> {
        Ok(self.finish())
    }
}

// == None Detection ==
/// Answers whether a value serializes through `serialize_none`.
///
/// Compound values are never `None`; they stop the check early with an error
/// instead of being walked.
struct NoneCheck;

impl NoneCheck {
    fn not_none<S>() -> Result<S, Error> {
        Err(Error::custom("value is present"))
    }
}

/// Runs [`NoneCheck`], treating an early stop as present.
fn is_none<T>(value: &T) -> bool
where
    T: Serialize + ?Sized,
{
    value.serialize(NoneCheck).unwrap_or(false)
}

impl ser::Serializer for NoneCheck {
    type Ok = bool;
    type Error = Error;

    type SerializeSeq = Impossible<bool, Error>;
    type SerializeTuple = Impossible<bool, Error>;
    type SerializeTupleStruct = Impossible<bool, Error>;
    type SerializeTupleVariant = Impossible<bool, Error>;
    type SerializeMap = Impossible<bool, Error>;
    type SerializeStruct = Impossible<bool, Error>;
    type SerializeStructVariant = Impossible<bool, Error>;

    fn serialize_bool(self, _v: bool) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_i8(self, _v: i8) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_i16(self, _v: i16) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_i32(self, _v: i32) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_i64(self, _v: i64) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_u8(self, _v: u8) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_u16(self, _v: u16) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_u32(self, _v: u32) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_u64(self, _v: u64) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_f32(self, _v: f32) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_f64(self, _v: f64) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_char(self, _v: char) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_str(self, _v: &str) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_none(self) -> Result<bool, Error> {
        Ok(true)
    }

    fn serialize_some<T>(self, _value: &T) -> Result<bool, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(false)
    }

    fn serialize_unit(self) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, _value: &T) -> Result<bool, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(false)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<bool, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(false)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Error> {
        Self::not_none()
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> {
        Self::not_none()
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        Self::not_none()
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        Self::not_none()
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> {
        Self::not_none()
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        Self::not_none()
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        Self::not_none()
    }
}
