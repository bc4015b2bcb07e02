//! Converts target-runtime values into the stable client representation and
//! textual input back into target values.

use quasar_jdwp::{FieldInfo, ObjectId, ReferenceTypeId, Vm, VmError, VmValue};

use crate::error::{DebugError, DebugResult};
use crate::object_registry::{ObjectHandle, ObjectKind, ObjectRegistry};
use crate::proto::{ClassField, DebugValue};

/// Rendered in place of a field or string whose value cannot be read, so one
/// bad field never fails a whole enumeration.
pub(crate) const MISSING: &str = "???";
/// Arrays longer than this render a leading sample plus an ellipsis token.
const ARRAY_PREVIEW: usize = 3;
/// Recursion bound for nested summaries (arrays of arrays, chained boxes).
const MAX_DEPTH: usize = 4;

/// Soften target errors: a disconnect propagates, anything else becomes the
/// fallback value.
pub(crate) fn best<T>(res: Result<T, VmError>, fallback: T) -> DebugResult<T> {
    match res {
        Ok(value) => Ok(value),
        Err(err) if err.is_disconnect() => Err(err.into()),
        Err(_) => Ok(fallback),
    }
}

pub(crate) fn best_opt<T>(res: Result<T, VmError>) -> DebugResult<Option<T>> {
    match res {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_disconnect() => Err(err.into()),
        Err(_) => Ok(None),
    }
}

/// Classify an object id against the target and record it in the identity
/// cache. Idempotent: a previously remembered id is returned as-is without
/// touching the target.
pub(crate) fn remember(
    vm: &dyn Vm,
    objects: &mut ObjectRegistry,
    id: ObjectId,
) -> DebugResult<ObjectHandle> {
    if let Some(handle) = objects.lookup(id) {
        return Ok(handle.clone());
    }

    let type_name = match best_opt(vm.object_reference_type(id))? {
        Some(class) => best(vm.reference_type_name(class), "<unknown>".to_string())?,
        None => "<unknown>".to_string(),
    };
    let kind = if best_opt(vm.string_text(id))?.is_some() {
        ObjectKind::Text
    } else if let Some(length) = best_opt(vm.array_length(id))? {
        ObjectKind::Array {
            element_type_name: best(vm.array_element_type_name(id), "<unknown>".to_string())?,
            length,
        }
    } else {
        ObjectKind::Plain
    };

    let handle = ObjectHandle {
        id,
        type_name,
        kind,
    };
    objects.remember(handle.clone());
    Ok(handle)
}

/// The [`VmValue`] variant a cached handle dereferences to.
pub(crate) fn value_for_handle(handle: &ObjectHandle) -> VmValue {
    match handle.kind {
        ObjectKind::Text => VmValue::Str(handle.id),
        ObjectKind::Array { .. } => VmValue::Array(handle.id),
        ObjectKind::Plain => VmValue::Object(handle.id),
    }
}

pub(crate) fn summarize(vm: &dyn Vm, value: &VmValue) -> DebugResult<String> {
    summarize_depth(vm, value, 0)
}

fn summarize_depth(vm: &dyn Vm, value: &VmValue, depth: usize) -> DebugResult<String> {
    Ok(match value {
        VmValue::Null => "null".to_string(),
        VmValue::Boolean(v) => v.to_string(),
        VmValue::Byte(v) => v.to_string(),
        VmValue::Short(v) => v.to_string(),
        VmValue::Int(v) => v.to_string(),
        VmValue::Long(v) => v.to_string(),
        VmValue::Float(v) => v.to_string(),
        VmValue::Double(v) => v.to_string(),
        VmValue::Char(c) => format!("'{c}'"),
        VmValue::Str(id) => match best_opt(vm.string_text(*id))? {
            Some(text) => format!("\"{text}\""),
            None => MISSING.to_string(),
        },
        VmValue::Array(id) => summarize_array(vm, *id, depth)?,
        VmValue::Object(id) => summarize_object(vm, *id, depth)?,
    })
}

fn summarize_array(vm: &dyn Vm, id: ObjectId, depth: usize) -> DebugResult<String> {
    if depth >= MAX_DEPTH {
        return Ok("[...]".to_string());
    }
    let Some(length) = best_opt(vm.array_length(id))? else {
        return Ok(MISSING.to_string());
    };
    let take = (length as usize).min(ARRAY_PREVIEW);
    let elements = best(vm.array_elements(id, 0, take as u32), Vec::new())?;
    let mut parts = Vec::with_capacity(take + 1);
    for element in &elements {
        parts.push(summarize_depth(vm, element, depth + 1)?);
    }
    if length as usize > ARRAY_PREVIEW {
        parts.push("...".to_string());
    }
    Ok(format!("[{}]", parts.join(", ")))
}

fn summarize_object(vm: &dyn Vm, id: ObjectId, depth: usize) -> DebugResult<String> {
    let Some(class) = best_opt(vm.object_reference_type(id))? else {
        return Ok(MISSING.to_string());
    };
    let type_name = best(vm.reference_type_name(class), "<unknown>".to_string())?;

    // Runtime reference boxes (IntRef, ObjectRef, ...) hold a closed-over
    // variable in their single `elem` field; summarize the boxed value
    // instead of the wrapper.
    if depth < MAX_DEPTH && is_ref_box_name(&type_name) {
        if let Some(elem) = ref_box_elem(vm, class)? {
            if let Some(boxed) = best_opt(vm.field_value(id, elem.id))? {
                return summarize_depth(vm, &boxed, depth + 1);
            }
        }
    }

    Ok(format!("Instance of {}", last_name_component(&type_name)))
}

fn ref_box_elem(vm: &dyn Vm, class: ReferenceTypeId) -> DebugResult<Option<FieldInfo>> {
    let fields = best(vm.fields(class), Vec::new())?;
    Ok(fields.into_iter().find(|f| f.name == "elem" && !f.is_static))
}

/// Matches the `*.[A-Z][a-z]+Ref` pattern of the runtime's box classes.
fn is_ref_box_name(type_name: &str) -> bool {
    let Some((_, component)) = type_name.rsplit_once('.') else {
        return false;
    };
    let Some(stem) = component.strip_suffix("Ref") else {
        return false;
    };
    let mut chars = stem.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            let rest = chars.as_str();
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase())
        }
        _ => false,
    }
}

pub(crate) fn last_name_component(type_name: &str) -> &str {
    let tail = type_name.rsplit('.').next().unwrap_or(type_name);
    tail.rsplit('$').next().unwrap_or(tail)
}

/// Enumerate the fields of an object, walking the declaring-class chain
/// upward. Each field gets a stable ordinal within the concatenated list;
/// unreadable values render as [`MISSING`] instead of failing the whole
/// enumeration.
pub(crate) fn fields_of(vm: &dyn Vm, object: ObjectId) -> DebugResult<Vec<ClassField>> {
    let mut out = Vec::new();
    let Some(mut class) = best_opt(vm.object_reference_type(object))? else {
        return Ok(out);
    };

    loop {
        for field in best(vm.fields(class), Vec::new())? {
            let value = if field.is_static {
                vm.static_field_value(class, field.id)
            } else {
                vm.field_value(object, field.id)
            };
            let summary = match best_opt(value)? {
                Some(value) => summarize_depth(vm, &value, 1)?,
                None => MISSING.to_string(),
            };
            out.push(ClassField {
                index: out.len() as u32,
                name: field.name,
                type_name: field.type_name,
                summary,
            });
        }
        match best(vm.superclass(class), None)? {
            Some(superclass) => class = superclass,
            None => break,
        }
    }
    Ok(out)
}

/// Find a field by name on `class` or any of its superclasses, returning the
/// declaring class alongside the field.
pub(crate) fn find_field(
    vm: &dyn Vm,
    class: ReferenceTypeId,
    name: &str,
) -> DebugResult<Option<(ReferenceTypeId, FieldInfo)>> {
    let mut current = class;
    loop {
        if let Some(field) = best(vm.fields(current), Vec::new())?
            .into_iter()
            .find(|f| f.name == name)
        {
            return Ok(Some((current, field)));
        }
        match best(vm.superclass(current), None)? {
            Some(superclass) => current = superclass,
            None => return Ok(None),
        }
    }
}

/// Marshal a target value for the client, recording every object id it
/// exposes in the identity cache.
pub(crate) fn marshal(
    vm: &dyn Vm,
    objects: &mut ObjectRegistry,
    value: &VmValue,
) -> DebugResult<DebugValue> {
    Ok(match value {
        VmValue::Null => DebugValue::Null,
        VmValue::Boolean(_)
        | VmValue::Byte(_)
        | VmValue::Short(_)
        | VmValue::Int(_)
        | VmValue::Long(_)
        | VmValue::Float(_)
        | VmValue::Double(_)
        | VmValue::Char(_) => DebugValue::Primitive {
            summary: summarize(vm, value)?,
            type_name: primitive_type_name(value).to_string(),
        },
        VmValue::Str(id) => {
            let handle = remember(vm, objects, *id)?;
            DebugValue::Str {
                summary: summarize(vm, value)?,
                fields: fields_of(vm, *id)?,
                type_name: handle.type_name,
                object_id: *id,
            }
        }
        VmValue::Array(id) => {
            let handle = remember(vm, objects, *id)?;
            let (element_type_name, length) = match &handle.kind {
                ObjectKind::Array {
                    element_type_name,
                    length,
                } => (element_type_name.clone(), *length),
                _ => (
                    best(vm.array_element_type_name(*id), "<unknown>".to_string())?,
                    best(vm.array_length(*id), 0)?,
                ),
            };
            DebugValue::Array {
                length,
                type_name: handle.type_name,
                element_type_name,
                object_id: *id,
            }
        }
        VmValue::Object(id) => {
            let handle = remember(vm, objects, *id)?;
            DebugValue::Object {
                summary: summarize(vm, value)?,
                fields: fields_of(vm, *id)?,
                type_name: handle.type_name,
                object_id: *id,
            }
        }
    })
}

fn primitive_type_name(value: &VmValue) -> &'static str {
    match value {
        VmValue::Boolean(_) => "boolean",
        VmValue::Byte(_) => "byte",
        VmValue::Short(_) => "short",
        VmValue::Int(_) => "int",
        VmValue::Long(_) => "long",
        VmValue::Float(_) => "float",
        VmValue::Double(_) => "double",
        VmValue::Char(_) => "char",
        _ => "object",
    }
}

/// Parse textual input into a target value of the given declared type.
/// Unsupported target types fail; the caller surfaces that as a plain
/// `false` reply.
pub(crate) fn parse_value(vm: &dyn Vm, type_name: &str, text: &str) -> DebugResult<VmValue> {
    let trimmed = text.trim();
    let parse_err = || DebugError::Parse {
        type_name: type_name.to_string(),
        text: text.to_string(),
    };

    match type_name {
        "boolean" => trimmed
            .parse()
            .map(VmValue::Boolean)
            .map_err(|_| parse_err()),
        "byte" => trimmed.parse().map(VmValue::Byte).map_err(|_| parse_err()),
        "short" => trimmed.parse().map(VmValue::Short).map_err(|_| parse_err()),
        "int" => trimmed.parse().map(VmValue::Int).map_err(|_| parse_err()),
        "long" => trimmed.parse().map(VmValue::Long).map_err(|_| parse_err()),
        "float" => trimmed.parse().map(VmValue::Float).map_err(|_| parse_err()),
        "double" => trimmed
            .parse()
            .map(VmValue::Double)
            .map_err(|_| parse_err()),
        "char" => {
            let inner = trimmed
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .unwrap_or(trimmed);
            let mut chars = inner.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(VmValue::Char(c)),
                _ => Err(parse_err()),
            }
        }
        "java.lang.String" => {
            let inner = text
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(text);
            Ok(vm.create_string(inner)?)
        }
        _ => Err(DebugError::Vm(VmError::Unsupported)),
    }
}

#[cfg(test)]
mod tests {
    use quasar_jdwp::mock::{MockVm, ScriptedClass, ScriptedObject};
    use quasar_jdwp::FieldInfo;

    use super::*;

    fn vm_with_object_class(class_name: &str) -> (MockVm, ReferenceTypeId) {
        let vm = MockVm::new();
        vm.load_class(ScriptedClass::new(1, class_name, "X.scala", "X.scala"));
        (vm, 1)
    }

    #[test]
    fn primitive_summaries_render_literals() {
        let vm = MockVm::new();
        assert_eq!(summarize(&vm, &VmValue::Boolean(true)).unwrap(), "true");
        assert_eq!(summarize(&vm, &VmValue::Int(-42)).unwrap(), "-42");
        assert_eq!(summarize(&vm, &VmValue::Double(1.5)).unwrap(), "1.5");
        assert_eq!(summarize(&vm, &VmValue::Char('x')).unwrap(), "'x'");
        assert_eq!(summarize(&vm, &VmValue::Null).unwrap(), "null");
    }

    #[test]
    fn string_summary_is_double_quoted() {
        let (vm, class) = vm_with_object_class("java.lang.String");
        vm.add_object(ScriptedObject::text(50, class, "abc"));
        assert_eq!(summarize(&vm, &VmValue::Str(50)).unwrap(), "\"abc\"");
    }

    #[test]
    fn short_arrays_render_all_elements() {
        let (vm, class) = vm_with_object_class("int[]");
        vm.add_object(ScriptedObject::array(
            60,
            class,
            "int",
            vec![VmValue::Int(1), VmValue::Int(2), VmValue::Int(3)],
        ));
        assert_eq!(summarize(&vm, &VmValue::Array(60)).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn long_arrays_render_a_sample_and_ellipsis() {
        let (vm, class) = vm_with_object_class("int[]");
        vm.add_object(ScriptedObject::array(
            60,
            class,
            "int",
            (1..=5).map(VmValue::Int).collect(),
        ));
        assert_eq!(
            summarize(&vm, &VmValue::Array(60)).unwrap(),
            "[1, 2, 3, ...]"
        );
    }

    #[test]
    fn object_summary_uses_the_last_name_component() {
        let (vm, class) = vm_with_object_class("com.example.deep.Widget");
        vm.add_object(ScriptedObject::plain(70, class));
        assert_eq!(
            summarize(&vm, &VmValue::Object(70)).unwrap(),
            "Instance of Widget"
        );
    }

    #[test]
    fn reference_boxes_summarize_their_boxed_value() {
        let vm = MockVm::new();
        let mut class = ScriptedClass::new(1, "scala.runtime.IntRef", "IntRef.scala", "IntRef.scala");
        class.fields.push(FieldInfo {
            id: 11,
            name: "elem".to_string(),
            type_name: "int".to_string(),
            is_static: false,
        });
        vm.load_class(class);
        vm.add_object(ScriptedObject::plain(70, 1).with_field(11, VmValue::Int(9)));

        assert_eq!(summarize(&vm, &VmValue::Object(70)).unwrap(), "9");
    }

    #[test]
    fn box_pattern_requires_a_qualified_capitalized_component() {
        assert!(is_ref_box_name("scala.runtime.IntRef"));
        assert!(is_ref_box_name("scala.runtime.ObjectRef"));
        assert!(!is_ref_box_name("IntRef"));
        assert!(!is_ref_box_name("scala.runtime.VolatileObjectRef"));
        assert!(!is_ref_box_name("scala.runtime.Ref"));
        assert!(!is_ref_box_name("com.example.Widget"));
    }

    #[test]
    fn field_enumeration_walks_the_superclass_chain() {
        let vm = MockVm::new();
        let mut base = ScriptedClass::new(1, "com.example.Base", "Base.scala", "Base.scala");
        base.fields.push(FieldInfo {
            id: 21,
            name: "inherited".to_string(),
            type_name: "int".to_string(),
            is_static: false,
        });
        let mut derived = ScriptedClass::new(2, "com.example.Derived", "Derived.scala", "Derived.scala");
        derived.superclass = Some(1);
        derived.fields.push(FieldInfo {
            id: 22,
            name: "own".to_string(),
            type_name: "int".to_string(),
            is_static: false,
        });
        derived.fields.push(FieldInfo {
            id: 23,
            name: "counter".to_string(),
            type_name: "int".to_string(),
            is_static: true,
        });
        derived.static_values.insert(23, VmValue::Int(100));
        vm.load_class(base);
        vm.load_class(derived);
        vm.add_object(
            ScriptedObject::plain(80, 2)
                .with_field(22, VmValue::Int(7))
                .with_field(21, VmValue::Int(3)),
        );

        let fields = fields_of(&vm, 80).unwrap();
        let rendered: Vec<(u32, &str, &str)> = fields
            .iter()
            .map(|f| (f.index, f.name.as_str(), f.summary.as_str()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                (0, "own", "7"),
                (1, "counter", "100"),
                (2, "inherited", "3"),
            ]
        );
    }

    #[test]
    fn unreadable_field_values_render_a_placeholder() {
        let vm = MockVm::new();
        let mut class = ScriptedClass::new(1, "com.example.Holey", "Holey.scala", "Holey.scala");
        class.fields.push(FieldInfo {
            id: 31,
            name: "present".to_string(),
            type_name: "int".to_string(),
            is_static: false,
        });
        class.fields.push(FieldInfo {
            id: 32,
            name: "absent".to_string(),
            type_name: "int".to_string(),
            is_static: false,
        });
        vm.load_class(class);
        vm.add_object(ScriptedObject::plain(80, 1).with_field(31, VmValue::Int(1)));

        let fields = fields_of(&vm, 80).unwrap();
        assert_eq!(fields[0].summary, "1");
        assert_eq!(fields[1].summary, "???");
    }

    #[test]
    fn marshal_remembers_object_ids() {
        let (vm, class) = vm_with_object_class("com.example.Widget");
        vm.add_object(ScriptedObject::plain(90, class));
        let mut objects = ObjectRegistry::default();

        let value = marshal(&vm, &mut objects, &VmValue::Object(90)).unwrap();
        assert!(matches!(value, DebugValue::Object { object_id: 90, .. }));
        assert!(objects.lookup(90).is_some());
    }

    #[test]
    fn parse_round_trips_primitive_grammars() {
        let vm = MockVm::new();
        for (ty, text, expected) in [
            ("boolean", " true ", VmValue::Boolean(true)),
            ("byte", "-4", VmValue::Byte(-4)),
            ("short", "300", VmValue::Short(300)),
            ("int", "123", VmValue::Int(123)),
            ("long", "-9000000000", VmValue::Long(-9_000_000_000)),
            ("char", "'z'", VmValue::Char('z')),
            ("char", "z", VmValue::Char('z')),
        ] {
            let parsed = parse_value(&vm, ty, text).unwrap();
            assert_eq!(parsed, expected, "{ty} {text:?}");
            // Round-trip law: the parsed mirror summarizes back to the
            // canonical literal.
            let summary = summarize(&vm, &parsed).unwrap();
            assert_eq!(summary, summarize(&vm, &expected).unwrap());
        }

        assert!(parse_value(&vm, "int", "twelve").is_err());
        assert!(parse_value(&vm, "char", "'ab'").is_err());
    }

    #[test]
    fn parse_string_strips_one_pair_of_quotes() {
        let vm = MockVm::new();
        let quoted = parse_value(&vm, "java.lang.String", "\"abc\"").unwrap();
        assert_eq!(summarize(&vm, &quoted).unwrap(), "\"abc\"");

        let verbatim = parse_value(&vm, "java.lang.String", "abc").unwrap();
        assert_eq!(summarize(&vm, &verbatim).unwrap(), "\"abc\"");
    }

    #[test]
    fn parse_rejects_unsupported_target_types() {
        let vm = MockVm::new();
        assert!(matches!(
            parse_value(&vm, "com.example.Widget", "x"),
            Err(DebugError::Vm(VmError::Unsupported))
        ));
    }
}
