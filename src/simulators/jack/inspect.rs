//! Heap object and array inspection through the class layouts of the source
//! map.

use crate::definitions::{Address, Word, THIS};
use crate::error::{SimError, SimResult};
use crate::parse::smap::SourceMap;
use crate::simulators::vm::memory::VmMemory;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedField {
    pub field_name: String,
    pub type_name: String,
    pub raw_value: Word,
    pub signed_value: i16,
    /// true if the declared type is a class (not int/char/boolean)
    pub is_reference: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedObject {
    pub class_name: String,
    pub heap_address: Address,
    pub fields: Vec<InspectedField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedArray {
    pub heap_address: Address,
    pub length: usize,
    pub elements: Vec<Word>,
}

fn is_primitive_type(type_name: &str) -> bool {
    matches!(type_name, "int" | "char" | "boolean")
}

/// Reads heap objects using Jack type information.
pub struct ObjectInspector<'a> {
    memory: &'a VmMemory,
    source_map: &'a SourceMap,
}

impl<'a> ObjectInspector<'a> {
    pub fn new(memory: &'a VmMemory, source_map: &'a SourceMap) -> Self {
        Self { memory, source_map }
    }

    /// Read the object at `address` using the layout of `class_name`.
    pub fn inspect_object(&self, address: Address, class_name: &str) -> SimResult<InspectedObject> {
        let layout = self.source_map.get_class_layout(class_name).ok_or_else(|| {
            SimError::runtime(format!("Unknown class: '{}'", class_name))
        })?;

        let mut fields = Vec::with_capacity(layout.fields.len());
        for (i, field_def) in layout.fields.iter().enumerate() {
            let raw = self.memory.read_ram(address + i)?;
            fields.push(InspectedField {
                field_name: field_def.name.clone(),
                type_name: field_def.type_name.clone(),
                raw_value: raw,
                signed_value: raw as i16,
                is_reference: !is_primitive_type(&field_def.type_name),
            });
        }

        Ok(InspectedObject {
            class_name: class_name.to_string(),
            heap_address: address,
            fields,
        })
    }

    /// Read the current `this` object. The class is derived from the
    /// `Class.method` prefix of the current function, the address from
    /// RAM[THIS].
    pub fn inspect_this(&self, current_function: &str) -> SimResult<InspectedObject> {
        let class_name = current_function.split_once('.').map(|(c, _)| c).ok_or_else(|| {
            SimError::runtime(format!(
                "Cannot determine class from function: '{}'",
                current_function
            ))
        })?;

        let this_addr = self.memory.read_ram(THIS)? as Address;
        self.inspect_object(this_addr, class_name)
    }

    /// Read `length` consecutive words starting at `address`.
    pub fn inspect_array(&self, address: Address, length: usize) -> SimResult<InspectedArray> {
        let mut elements = Vec::with_capacity(length);
        for i in 0..length {
            elements.push(self.memory.read_ram(address + i)?);
        }

        Ok(InspectedArray {
            heap_address: address,
            length,
            elements,
        })
    }
}

impl fmt::Display for InspectedObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} @{} {{", self.class_name, self.heap_address)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: ", field.field_name)?;
            if field.is_reference {
                write!(f, "@{}", field.raw_value)?;
            } else {
                write!(f, "{}", field.signed_value)?;
            }
        }
        write!(f, " }}")
    }
}

impl fmt::Display for InspectedArray {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Array @{} [", self.heap_address)?;
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", *element as i16)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (VmMemory, SourceMap) {
        let mut memory = VmMemory::default();
        let mut map = SourceMap::default();
        map.load_string(
            "CLASS Point\nFIELD int x\nFIELD int y\nFIELD Point next\n",
            "test.smap",
        )
        .unwrap();

        // a Point at heap address 3000: x = 7, y = -2, next = 3100
        memory.write_ram(3000, 7).unwrap();
        memory.write_ram(3001, (-2i16) as Word).unwrap();
        memory.write_ram(3002, 3100).unwrap();

        (memory, map)
    }

    #[test]
    fn test_inspect_object() {
        let (memory, map) = setup();
        let inspector = ObjectInspector::new(&memory, &map);
        let obj = inspector.inspect_object(3000, "Point").unwrap();

        assert_eq!("Point", obj.class_name);
        assert_eq!(3000, obj.heap_address);
        assert_eq!(3, obj.fields.len());
        assert_eq!(7, obj.fields[0].signed_value);
        assert!(!obj.fields[0].is_reference);
        assert_eq!(-2, obj.fields[1].signed_value);
        assert!(obj.fields[2].is_reference);
        assert_eq!(3100, obj.fields[2].raw_value);
    }

    #[test]
    fn test_inspect_this_uses_class_prefix() {
        let (mut memory, map) = setup();
        memory.write_ram(THIS, 3000).unwrap();

        let inspector = ObjectInspector::new(&memory, &map);
        let obj = inspector.inspect_this("Point.getX").unwrap();
        assert_eq!("Point", obj.class_name);
        assert_eq!(3000, obj.heap_address);

        assert!(inspector.inspect_this("noclass").is_err());
    }

    #[test]
    fn test_inspect_array() {
        let (mut memory, map) = setup();
        for i in 0..4 {
            memory.write_ram(2048 + i, (i as Word) * 10).unwrap();
        }

        let inspector = ObjectInspector::new(&memory, &map);
        let arr = inspector.inspect_array(2048, 4).unwrap();
        assert_eq!(vec![0, 10, 20, 30], arr.elements);
        assert_eq!("Array @2048 [0, 10, 20, 30]", arr.to_string());
    }

    #[test]
    fn test_unknown_class_is_error() {
        let (memory, map) = setup();
        let inspector = ObjectInspector::new(&memory, &map);
        assert!(inspector.inspect_object(3000, "Nope").is_err());
    }

    #[test]
    fn test_object_formatting() {
        let (memory, map) = setup();
        let inspector = ObjectInspector::new(&memory, &map);
        let obj = inspector.inspect_object(3000, "Point").unwrap();
        assert_eq!("Point @3000 { x: 7, y: -2, next: @3100 }", obj.to_string());
    }
}
