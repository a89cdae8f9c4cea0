//! In-process sketch-document host.
//!
//! A small stand-in for a real single-threaded CAD application: an
//! application object with a user interface and an active design, a root
//! component holding sketches and lines, a `geom` module with `Point3D` and
//! `Vector3D` types that expose `create` factories, and a `make` shortcut
//! for simple shapes. The binary runs against it, and the tests use it as
//! their host.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    traits::{Host, HostError, HostObject},
    value::{HostValue, Kwargs, ObjectRef},
};

/// Demo host application.
pub struct DemoHost {
    app: Arc<Application>,
    geom: ObjectRef,
    make: ObjectRef,
}

impl Default for DemoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoHost {
    /// Create a host with an empty design.
    #[must_use]
    pub fn new() -> Self {
        let xy: ObjectRef = Arc::new(ConstructionPlane { name: "XY" });
        let xz: ObjectRef = Arc::new(ConstructionPlane { name: "XZ" });
        let root = Arc::new(Component {
            sketches: Arc::new(Sketches::default()),
            xy,
            xz,
        });
        let app = Arc::new(Application {
            ui: Arc::new(UserInterface::default()),
            design: Arc::new(Design { root }),
        });
        Self {
            app,
            geom: Arc::new(GeomModule),
            make: Arc::new(Factory),
        }
    }

    /// Messages shown through `ui.messageBox`, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.app.ui.messages.lock().clone()
    }
}

impl Host for DemoHost {
    fn name(&self) -> &'static str {
        "DemoCAD"
    }

    fn root_aliases(&self) -> Vec<String> {
        ["app", "ui", "design", "rootComponent", "make"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn root(&self, alias: &str) -> Result<Option<HostValue>, HostError> {
        let value: ObjectRef = match alias {
            "app" => self.app.clone(),
            "ui" => self.app.ui.clone(),
            "design" => self.app.design.clone(),
            "rootComponent" => self.app.design.root.clone(),
            "make" => self.make.clone(),
            _ => return Ok(None),
        };
        Ok(Some(HostValue::Object(value)))
    }

    fn default_root(&self) -> Result<HostValue, HostError> {
        Ok(HostValue::Object(self.app.clone()))
    }

    fn module_names(&self) -> Vec<String> {
        vec!["geom".into()]
    }

    fn module(&self, name: &str) -> Option<HostValue> {
        (name == "geom").then(|| HostValue::Object(self.geom.clone()))
    }
}

fn arity(method: &str, args: &[HostValue], expected: usize) -> Result<(), HostError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(HostError::Arity {
            method: method.into(),
            expected,
            got: args.len(),
        })
    }
}

fn number(method: &str, argument: &str, value: &HostValue) -> Result<f64, HostError> {
    value.as_f64().ok_or_else(|| HostError::ArgumentType {
        method: method.into(),
        argument: argument.into(),
        expected: "a number".into(),
        got: value.type_name(),
    })
}

fn object_of(
    method: &str,
    argument: &str,
    value: &HostValue,
    type_name: &str,
) -> Result<ObjectRef, HostError> {
    match value {
        HostValue::Object(obj) if obj.type_name() == type_name => Ok(obj.clone()),
        other => Err(HostError::ArgumentType {
            method: method.into(),
            argument: argument.into(),
            expected: type_name.into(),
            got: other.type_name(),
        }),
    }
}

/// Positional argument `index`, else keyword `name`, else `None`.
fn arg<'a>(args: &'a [HostValue], kwargs: &'a Kwargs, index: usize, name: &str) -> Option<&'a HostValue> {
    args.get(index).or_else(|| kwargs.get(name))
}

fn coords(obj: &ObjectRef) -> Result<[f64; 3], HostError> {
    let mut out = [0.0; 3];
    for (slot, axis) in out.iter_mut().zip(["x", "y", "z"]) {
        let value = obj
            .get_attribute(axis)?
            .ok_or_else(|| HostError::no_attribute(obj.type_name(), axis))?;
        *slot = number("coords", axis, &value)?;
    }
    Ok(out)
}

fn index_into<T: HostObject + 'static>(
    method: &str,
    items: &[Arc<T>],
    args: &[HostValue],
) -> Result<HostValue, HostError> {
    arity(method, args, 1)?;
    let index = args[0].as_i64().ok_or_else(|| HostError::ArgumentType {
        method: method.into(),
        argument: "index".into(),
        expected: "an integer".into(),
        got: args[0].type_name(),
    })?;
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .map(|item| HostValue::Object(item.clone() as ObjectRef))
        .ok_or_else(|| HostError::Invalid(format!("{method}(): index {index} out of range")))
}

fn unknown_method(type_name: &str, name: &str) -> HostError {
    HostError::no_attribute(type_name, name)
}

struct Application {
    ui: Arc<UserInterface>,
    design: Arc<Design>,
}

impl HostObject for Application {
    fn type_name(&self) -> &'static str {
        "Application"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "name" => Some("DemoCAD".into()),
            "version" => Some("1.0.0".into()),
            "userInterface" => Some(HostValue::Object(self.ui.clone())),
            "activeProduct" => Some(HostValue::Object(self.design.clone())),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }

    fn attribute_names(&self) -> Vec<String> {
        ["name", "version", "userInterface", "activeProduct"]
            .map(String::from)
            .to_vec()
    }
}

#[derive(Default)]
struct UserInterface {
    messages: Mutex<Vec<String>>,
}

impl HostObject for UserInterface {
    fn type_name(&self) -> &'static str {
        "UserInterface"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "messageCount" => Some(HostValue::Int(self.messages.lock().len() as i64)),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        name == "messageBox"
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, kwargs: Kwargs) -> Result<HostValue, HostError> {
        if name != "messageBox" {
            return Err(unknown_method(self.type_name(), name));
        }
        let text = arg(&args, &kwargs, 0, "text")
            .ok_or(HostError::Arity {
                method: "messageBox".into(),
                expected: 1,
                got: 0,
            })?
            .display();
        tracing::debug!(%text, "messageBox");
        self.messages.lock().push(text);
        Ok("ok".into())
    }
}

struct Design {
    root: Arc<Component>,
}

impl HostObject for Design {
    fn type_name(&self) -> &'static str {
        "Design"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "name" => Some("Untitled".into()),
            "objectType" => Some("demo::Design".into()),
            "rootComponent" => Some(HostValue::Object(self.root.clone())),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }
}

struct Component {
    sketches: Arc<Sketches>,
    xy: ObjectRef,
    xz: ObjectRef,
}

impl HostObject for Component {
    fn type_name(&self) -> &'static str {
        "Component"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "name" => Some("root".into()),
            "sketches" => Some(HostValue::Object(self.sketches.clone())),
            "xYConstructionPlane" => Some(HostValue::Object(self.xy.clone())),
            "xZConstructionPlane" => Some(HostValue::Object(self.xz.clone())),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }
}

struct ConstructionPlane {
    name: &'static str,
}

impl HostObject for ConstructionPlane {
    fn type_name(&self) -> &'static str {
        "ConstructionPlane"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok((name == "name").then(|| self.name.into()))
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }
}

#[derive(Default)]
struct Sketches {
    items: Mutex<Vec<Arc<Sketch>>>,
}

impl HostObject for Sketches {
    fn type_name(&self) -> &'static str {
        "Sketches"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok((name == "count").then(|| HostValue::Int(self.items.lock().len() as i64)))
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "add" | "item")
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        match name {
            "add" => {
                arity("add", &args, 1)?;
                let plane = object_of("add", "planarEntity", &args[0], "ConstructionPlane")?;
                let mut items = self.items.lock();
                let sketch = Arc::new(Sketch {
                    name: format!("Sketch{}", items.len() + 1),
                    plane,
                    curves: Arc::new(SketchCurves::default()),
                });
                items.push(sketch.clone());
                Ok(HostValue::Object(sketch))
            }
            "item" => index_into("item", &self.items.lock(), &args),
            _ => Err(unknown_method(self.type_name(), name)),
        }
    }
}

struct Sketch {
    name: String,
    plane: ObjectRef,
    curves: Arc<SketchCurves>,
}

impl HostObject for Sketch {
    fn type_name(&self) -> &'static str {
        "Sketch"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "name" => Some(self.name.clone().into()),
            "isVisible" => Some(true.into()),
            "referencePlane" => Some(HostValue::Object(self.plane.clone())),
            "sketchCurves" => Some(HostValue::Object(self.curves.clone())),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }
}

#[derive(Default)]
struct SketchCurves {
    lines: Arc<SketchLines>,
}

impl HostObject for SketchCurves {
    fn type_name(&self) -> &'static str {
        "SketchCurves"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "sketchLines" => Some(HostValue::Object(self.lines.clone())),
            "count" => Some(HostValue::Int(self.lines.items.lock().len() as i64)),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }
}

#[derive(Default)]
struct SketchLines {
    items: Mutex<Vec<Arc<SketchLine>>>,
}

impl SketchLines {
    fn push(&self, start: [f64; 3], end: [f64; 3]) -> Arc<SketchLine> {
        let line = Arc::new(SketchLine { start, end });
        self.items.lock().push(line.clone());
        line
    }
}

impl HostObject for SketchLines {
    fn type_name(&self) -> &'static str {
        "SketchLines"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok((name == "count").then(|| HostValue::Int(self.items.lock().len() as i64)))
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "addByTwoPoints" | "addTwoPointRectangle" | "item")
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        match name {
            "addByTwoPoints" => {
                arity(name, &args, 2)?;
                let start = coords(&object_of(name, "startPoint", &args[0], "Point3D")?)?;
                let end = coords(&object_of(name, "endPoint", &args[1], "Point3D")?)?;
                Ok(HostValue::Object(self.push(start, end)))
            }
            "addTwoPointRectangle" => {
                arity(name, &args, 2)?;
                let [x0, y0, z] = coords(&object_of(name, "pointOne", &args[0], "Point3D")?)?;
                let [x1, y1, _] = coords(&object_of(name, "pointTwo", &args[1], "Point3D")?)?;
                let corners = [[x0, y0, z], [x1, y0, z], [x1, y1, z], [x0, y1, z]];
                let lines = (0..4)
                    .map(|i| HostValue::Object(self.push(corners[i], corners[(i + 1) % 4])))
                    .collect();
                Ok(HostValue::List(lines))
            }
            "item" => index_into(name, &self.items.lock(), &args),
            _ => Err(unknown_method(self.type_name(), name)),
        }
    }
}

struct SketchLine {
    start: [f64; 3],
    end: [f64; 3],
}

impl HostObject for SketchLine {
    fn type_name(&self) -> &'static str {
        "SketchLine"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "startPoint" => Some(HostValue::object(Point3D::new(self.start))),
            "endPoint" => Some(HostValue::object(Point3D::new(self.end))),
            "length" => Some(HostValue::Float(distance(self.start, self.end))),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method(self.type_name(), name))
    }
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(p, q)| (p - q).powi(2))
        .sum::<f64>()
        .sqrt()
}

struct Point3D {
    xyz: [f64; 3],
}

impl Point3D {
    const fn new(xyz: [f64; 3]) -> Self {
        Self { xyz }
    }
}

impl HostObject for Point3D {
    fn type_name(&self) -> &'static str {
        "Point3D"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "x" => Some(self.xyz[0].into()),
            "y" => Some(self.xyz[1].into()),
            "z" => Some(self.xyz[2].into()),
            "objectType" => Some("geom::Point3D".into()),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "distanceTo" | "asArray")
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        match name {
            "distanceTo" => {
                arity(name, &args, 1)?;
                let other = coords(&object_of(name, "point", &args[0], "Point3D")?)?;
                Ok(distance(self.xyz, other).into())
            }
            "asArray" => Ok(HostValue::List(self.xyz.iter().map(|v| (*v).into()).collect())),
            _ => Err(unknown_method(self.type_name(), name)),
        }
    }

    fn attribute_names(&self) -> Vec<String> {
        ["x", "y", "z", "objectType"].map(String::from).to_vec()
    }
}

struct Vector3D {
    xyz: [f64; 3],
}

impl HostObject for Vector3D {
    fn type_name(&self) -> &'static str {
        "Vector3D"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "x" => Some(self.xyz[0].into()),
            "y" => Some(self.xyz[1].into()),
            "z" => Some(self.xyz[2].into()),
            "length" => Some(distance(self.xyz, [0.0; 3]).into()),
            "objectType" => Some("geom::Vector3D".into()),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        name == "dotProduct"
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        if name != "dotProduct" {
            return Err(unknown_method(self.type_name(), name));
        }
        arity(name, &args, 1)?;
        let other = coords(&object_of(name, "vector", &args[0], "Vector3D")?)?;
        Ok(self.xyz.iter().zip(other).map(|(a, b)| a * b).sum::<f64>().into())
    }
}

/// A type object in the `geom` module; `create(x, y, z)` builds an instance.
struct GeomType {
    name: &'static str,
}

impl HostObject for GeomType {
    fn type_name(&self) -> &'static str {
        "type"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok((name == "name").then(|| self.name.into()))
    }

    fn has_method(&self, name: &str) -> bool {
        name == "create"
    }

    fn has_factory(&self) -> bool {
        true
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, kwargs: Kwargs) -> Result<HostValue, HostError> {
        if name != "create" {
            return Err(unknown_method(self.name, name));
        }
        if args.len() > 3 {
            return Err(HostError::Arity {
                method: format!("{}.create", self.name),
                expected: 3,
                got: args.len(),
            });
        }
        let mut xyz = [0.0; 3];
        for (i, axis) in ["x", "y", "z"].into_iter().enumerate() {
            if let Some(value) = arg(&args, &kwargs, i, axis) {
                xyz[i] = number("create", axis, value)?;
            }
        }
        Ok(match self.name {
            "Point3D" => HostValue::object(Point3D::new(xyz)),
            _ => HostValue::object(Vector3D { xyz }),
        })
    }
}

struct GeomModule;

impl HostObject for GeomModule {
    fn type_name(&self) -> &'static str {
        "module"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "name" => Some("geom".into()),
            "Point3D" => Some(HostValue::object(GeomType { name: "Point3D" })),
            "Vector3D" => Some(HostValue::object(GeomType { name: "Vector3D" })),
            _ => None,
        })
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        Err(unknown_method("geom", name))
    }
}

/// `make.*` shortcuts for simple shapes.
struct Factory;

impl HostObject for Factory {
    fn type_name(&self) -> &'static str {
        "ShapeFactory"
    }

    fn get_attribute(&self, _name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(None)
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "circle" | "rectangle")
    }

    fn call_method(&self, name: &str, args: Vec<HostValue>, kwargs: Kwargs) -> Result<HostValue, HostError> {
        match name {
            "circle" => {
                let radius = arg(&args, &kwargs, 0, "radius").cloned().ok_or(HostError::Arity {
                    method: "circle".into(),
                    expected: 1,
                    got: 0,
                })?;
                if number("circle", "radius", &radius)? < 0.0 {
                    return Err(HostError::Invalid("circle(): radius must be non-negative".into()));
                }
                Ok(HostValue::object(Circle { radius }))
            }
            "rectangle" => {
                arity(name, &args, 2)?;
                let width = number(name, "width", &args[0])?;
                let height = number(name, "height", &args[1])?;
                Ok(HostValue::object(Rectangle { width, height }))
            }
            _ => Err(unknown_method(self.type_name(), name)),
        }
    }
}

struct Circle {
    radius: HostValue,
}

impl HostObject for Circle {
    fn type_name(&self) -> &'static str {
        "Circle"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        let r = self.radius.as_f64().unwrap_or_default();
        Ok(match name {
            "name" => Some("Circle".into()),
            "radius" => Some(self.radius.clone()),
            "diameter" => Some((2.0 * r).into()),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        name == "area"
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        if name != "area" {
            return Err(unknown_method(self.type_name(), name));
        }
        let r = self.radius.as_f64().unwrap_or_default();
        Ok((std::f64::consts::PI * r * r).into())
    }
}

struct Rectangle {
    width: f64,
    height: f64,
}

impl HostObject for Rectangle {
    fn type_name(&self) -> &'static str {
        "Rectangle"
    }

    fn get_attribute(&self, name: &str) -> Result<Option<HostValue>, HostError> {
        Ok(match name {
            "name" => Some("Rectangle".into()),
            "width" => Some(self.width.into()),
            "height" => Some(self.height.into()),
            _ => None,
        })
    }

    fn has_method(&self, name: &str) -> bool {
        name == "area"
    }

    fn call_method(&self, name: &str, _: Vec<HostValue>, _: Kwargs) -> Result<HostValue, HostError> {
        if name != "area" {
            return Err(unknown_method(self.type_name(), name));
        }
        Ok((self.width * self.height).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(host: &DemoHost, alias: &str) -> ObjectRef {
        host.root(alias).unwrap().unwrap().as_object().unwrap().clone()
    }

    #[test]
    fn test_sketch_and_lines() {
        let host = DemoHost::new();
        let component = root(&host, "rootComponent");
        let sketches = component.get_attribute("sketches").unwrap().unwrap();
        let plane = component.get_attribute("xYConstructionPlane").unwrap().unwrap();

        let sketches = sketches.as_object().unwrap().clone();
        let sketch = sketches.call_method("add", vec![plane], Kwargs::new()).unwrap();
        let sketch = sketch.as_object().unwrap().clone();
        assert_eq!(sketch.get_attribute("name").unwrap().unwrap().as_str(), Some("Sketch1"));

        let geom = host.module("geom").unwrap();
        let point_type = geom.as_object().unwrap().get_attribute("Point3D").unwrap().unwrap();
        let point_type = point_type.as_object().unwrap().clone();
        assert!(point_type.has_factory());
        let p0 = point_type.call_method("create", vec![], Kwargs::new()).unwrap();
        let p1 = point_type
            .call_method("create", vec![3_i64.into(), 4_i64.into()], Kwargs::new())
            .unwrap();

        let curves = sketch.get_attribute("sketchCurves").unwrap().unwrap();
        let lines = curves.as_object().unwrap().get_attribute("sketchLines").unwrap().unwrap();
        let lines = lines.as_object().unwrap().clone();
        let line = lines.call_method("addByTwoPoints", vec![p0, p1], Kwargs::new()).unwrap();
        let length = line.as_object().unwrap().get_attribute("length").unwrap().unwrap();
        assert_eq!(length.as_f64(), Some(5.0));
        assert_eq!(lines.get_attribute("count").unwrap().unwrap().as_i64(), Some(1));
    }

    #[test]
    fn test_wrong_argument_type_is_reported() {
        let host = DemoHost::new();
        let sketches = root(&host, "rootComponent")
            .get_attribute("sketches")
            .unwrap()
            .unwrap();
        let err = sketches
            .as_object()
            .unwrap()
            .call_method("add", vec![HostValue::Int(1)], Kwargs::new())
            .unwrap_err();
        assert!(matches!(err, HostError::ArgumentType { .. }), "{err}");
    }

    #[test]
    fn test_circle_keeps_radius_verbatim() {
        let host = DemoHost::new();
        let circle = root(&host, "make")
            .call_method("circle", vec![HostValue::Int(5)], Kwargs::new())
            .unwrap();
        let radius = circle.as_object().unwrap().get_attribute("radius").unwrap().unwrap();
        assert_eq!(radius.as_i64(), Some(5));
    }

    #[test]
    fn test_message_box_records_text() {
        let host = DemoHost::new();
        root(&host, "ui")
            .call_method("messageBox", vec!["hello".into()], Kwargs::new())
            .unwrap();
        assert_eq!(host.messages(), vec!["hello".to_string()]);
    }
}
