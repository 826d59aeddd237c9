use super::*;
use crate::kernel::PolygonKernel;
use crate::script::value::lookup;
use crate::script::{parse_program, Limits, Meter, ScriptError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn run(src: &str) -> ScriptResult<Value> {
    let program = parse_program(src)?;
    let root = CapabilitySet::standard().install();
    let mut interp = Interpreter::new(
        Arc::new(PolygonKernel),
        root,
        Meter::new(Limits::default(), CancellationToken::new()),
    );
    let global = interp.run(&program)?;
    let main = lookup(&global, "main").expect("main defined");
    interp.call_value(&main, vec![])
}

fn volume(value: &Value) -> f64 {
    match value {
        Value::Solid(solid) => solid.signed_volume(),
        other => panic!("expected a solid, got {:?}", other),
    }
}

#[test]
fn test_standard_set_is_enumerable() {
    let caps = CapabilitySet::standard();
    assert_eq!(
        caps.names(),
        vec![
            "primitives",
            "booleans",
            "transforms",
            "extrusions",
            "hulls",
            "require",
            "Math",
            "Array"
        ]
    );
    assert!(!caps.contains("fetch"));
}

#[test]
fn test_root_bindings_are_constant() {
    let err = run("primitives = 1;\nfunction main() {}").unwrap_err();
    assert!(matches!(err, ScriptError::Type(_)));
}

#[test]
fn test_host_globals_do_not_exist() {
    for name in ["window", "globalThis", "process", "console"] {
        let src = format!("function main() {{ return {}; }}", name);
        assert!(matches!(run(&src), Err(ScriptError::Reference(_))), "{}", name);
    }
}

#[test]
fn test_cuboid_from_options() {
    let value = run("const main = () => primitives.cuboid({ size: [2, 3, 4] });").unwrap();
    assert!((volume(&value) - 24.0).abs() < 1e-9);
}

#[test]
fn test_require_returns_geometry_namespaces() {
    let src = r#"
        const { primitives: p, booleans } = require('@jscad/modeling')
        const other = require('fs')
        function main() {
            if (other.readFileSync !== undefined) return null
            return booleans.union(p.cube({ size: 2 }), p.cube({ size: 2, center: [1, 0, 0] }))
        }
    "#;
    let value = run(src).unwrap();
    assert!((volume(&value) - 12.0).abs() < 1e-6);
}

#[test]
fn test_screw_example() {
    let src = r#"
        const main = () => {
          const shaft = primitives.cylinder({ radius: 3, height: 30, segments: 32 });
          const head = primitives.cylinder({ radius: 5, height: 4, segments: 32 });
          const headTranslated = transforms.translate([0, 0, 15], head);
          return booleans.union(shaft, headTranslated);
        };
    "#;
    let value = run(src).unwrap();
    let Value::Solid(solid) = &value else {
        panic!("expected a solid");
    };
    let bounds = solid.bounds();
    assert!((bounds.max.z - 17.0).abs() < 1e-9);
    assert!((bounds.min.z + 15.0).abs() < 1e-9);
}

#[test]
fn test_subtract_drills_a_hole() {
    let src = r#"
        function main() {
            const block = primitives.cuboid({ size: [10, 10, 10] })
            const hole = primitives.cylinder({ radius: 2, height: 20, segments: 16 })
            return booleans.subtract(block, hole)
        }
    "#;
    let v = volume(&run(src).unwrap());
    assert!(v > 800.0 && v < 900.0, "volume {}", v);
}

#[test]
fn test_transform_returns_array_for_several_shapes() {
    let src = r#"
        function main() {
            const a = primitives.cube({ size: 1 })
            const moved = transforms.translate([5, 0, 0], a, a)
            return moved.length
        }
    "#;
    assert!(matches!(run(src), Ok(Value::Number(n)) if n == 2.0));
}

#[test]
fn test_extrude_rectangle() {
    let src = r#"
        function main() {
            const profile = primitives.rectangle({ size: [4, 2] })
            return extrusions.extrudeLinear({ height: 3 }, profile)
        }
    "#;
    assert!((volume(&run(src).unwrap()) - 24.0).abs() < 1e-9);
}

#[test]
fn test_hull_of_spheres() {
    let src = r#"
        function main() {
            const a = primitives.sphere({ radius: 1, segments: 12 })
            const b = transforms.translateX(4, a)
            return hulls.hull(a, b)
        }
    "#;
    let v = volume(&run(src).unwrap());
    assert!(v > 4.0 && v < 4.0 * std::f64::consts::PI * 2.0);
}

#[test]
fn test_invalid_dimensions_are_geometry_errors() {
    let err = run("function main() { return primitives.sphere({ radius: -1 }); }").unwrap_err();
    assert!(matches!(err, ScriptError::Geometry(_)));
    assert!(err.to_string().contains("radius"));
}

#[test]
fn test_wrong_argument_types() {
    let err = run("function main() { return primitives.cuboid({ size: 'big' }); }").unwrap_err();
    assert!(matches!(err, ScriptError::Type(_)));
    let err = run("function main() { return booleans.union(1, 2); }").unwrap_err();
    assert!(err.to_string().contains("expected geometry"));
}

#[test]
fn test_math_and_array_intrinsics() {
    let src = r#"
        function main() {
            const xs = Array.from({ length: 4 }, (_, i) => i * 2)
            return Math.max(...xs) + Math.round(Math.PI) + Math.sqrt(16) + (Array.isArray(xs) ? 1 : 0)
        }
    "#;
    assert!(matches!(run(src), Ok(Value::Number(n)) if n == 6.0 + 3.0 + 4.0 + 1.0));
}

#[test]
fn test_geometry_budget_is_charged() {
    let program = parse_program(
        "function main() { let s; for (let i = 0; i < 100; i++) s = primitives.sphere({ radius: 1, segments: 64 }); return s; }",
    )
    .unwrap();
    let limits = Limits {
        max_polygons: 10_000,
        ..Limits::default()
    };
    let mut interp = Interpreter::new(
        Arc::new(PolygonKernel),
        CapabilitySet::standard().install(),
        Meter::new(limits, CancellationToken::new()),
    );
    let global = interp.run(&program).unwrap();
    let main = lookup(&global, "main").unwrap();
    let err = interp.call_value(&main, vec![]).unwrap_err();
    assert_eq!(
        err,
        ScriptError::BudgetExhausted(crate::script::BudgetKind::Polygons)
    );
}

#[test]
fn test_array_from_is_charged_to_allocation_budget() {
    let src = r#"
        function main() {
            const keep = [];
            for (let i = 0; i < 40; i++) keep.push(Array.from({ length: 1048576 }));
            return keep.length;
        }
    "#;
    assert_eq!(
        run(src).unwrap_err(),
        ScriptError::BudgetExhausted(crate::script::BudgetKind::Memory)
    );
}
