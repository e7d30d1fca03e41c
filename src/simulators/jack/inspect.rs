use crate::definitions::{Address, Word, THIS};
use crate::error::{SimError, SimResult};
use crate::simulators::jack::source_map::SourceMap;
use crate::simulators::vm::memory::VmMemory;

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedField {
    pub field_name: String,
    pub type_name: String,
    pub raw_value: Word,
    pub signed_value: i16,
    /// true when the declared type is a class rather than int/char/boolean
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

/// Reads heap objects and arrays out of VM RAM using the class layouts
/// from the source map.
pub struct ObjectInspector<'a> {
    memory: &'a VmMemory,
    source_map: &'a SourceMap,
}

impl<'a> ObjectInspector<'a> {
    pub fn new(memory: &'a VmMemory, source_map: &'a SourceMap) -> Self {
        Self { memory, source_map }
    }

    pub fn inspect_object(&self, address: Address, class_name: &str) -> SimResult<InspectedObject> {
        let layout = self
            .source_map
            .class_layout(class_name)
            .ok_or_else(|| SimError::runtime(format!("Unknown class: '{}'", class_name)))?;

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

    /// Inspect the current object: the class comes from the text before the
    /// first `.` of the function name, the address from the THIS pointer.
    pub fn inspect_this(&self, current_function: &str) -> SimResult<InspectedObject> {
        let class_name = current_function.split('.').next().filter(|c| {
            !c.is_empty() && current_function.contains('.')
        });
        let Some(class_name) = class_name else {
            return Err(SimError::runtime(format!(
                "Cannot determine class from function: '{}'",
                current_function
            )));
        };

        let this_addr = self.memory.read_ram(THIS)? as Address;
        self.inspect_object(this_addr, class_name)
    }

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

pub fn format_object(obj: &InspectedObject) -> String {
    let mut out = format!("{} @{} {{", obj.class_name, obj.heap_address);
    for (i, field) in obj.fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, " {}: ", field.field_name);
        if field.is_reference {
            let _ = write!(out, "@{}", field.raw_value);
        } else {
            let _ = write!(out, "{}", field.signed_value);
        }
    }
    out.push_str(" }");
    out
}

pub fn format_array(arr: &InspectedArray) -> String {
    let mut out = format!("Array @{} [", arr.heap_address);
    for (i, element) in arr.elements.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", *element as i16);
    }
    out.push(']');
    out
}

pub fn is_primitive_type(type_name: &str) -> bool {
    matches!(type_name, "int" | "char" | "boolean")
}
