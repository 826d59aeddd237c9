use partgen_core::executor::{CollectionItem, MISSING_MAIN};
use partgen_core::mesh::stl::encoded_len;
use partgen_core::reducer::reduce;
use partgen_core::security::{validate, PatternClass, SecurityRejection};
use partgen_core::{
    compile, ExecutionBudget, ExecutionOutcome, Executor, FailureCategory, PipelineError, Program,
    SolidOrCollection,
};
use partgen_core::capabilities::CapabilitySet;
use partgen_core::kernel::PolygonKernel;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn compile_default(src: &str) -> Result<partgen_core::BinaryArtifact, PipelineError> {
    compile(src, &ExecutionBudget::default(), &CancellationToken::new())
}

fn execute(src: &str) -> ExecutionOutcome {
    let program = validate(Program::new(src)).unwrap();
    Executor::new(
        CapabilitySet::standard(),
        Arc::new(PolygonKernel::new()),
        ExecutionBudget::default(),
    )
    .execute(&program, &CancellationToken::new())
}

#[test]
fn test_cuboid_artifact_size() {
    let artifact = compile_default(
        "const { primitives } = require('@jscad/modeling');\nconst main = () => primitives.cuboid({ size: [20, 20, 20] });",
    )
    .unwrap();
    assert_eq!(artifact.len(), 80 + 4 + 12 * 50);
    assert_eq!(artifact.triangle_count(), 12);
}

#[test]
fn test_generated_screw_compiles() {
    let src = r#"
const main = () => {
  const shaftRadius = 3;
  const shaftHeight = 30;
  const headRadius = 5;
  const headHeight = 4;

  const shaft = primitives.cylinder({ radius: shaftRadius, height: shaftHeight, segments: 32 });
  const head = primitives.cylinder({ radius: headRadius, height: headHeight, segments: 32 });
  const headTranslated = transforms.translate([0, 0, shaftHeight / 2], head);

  return booleans.union(shaft, headTranslated);
};
"#;
    let artifact = compile_default(src).unwrap();
    let expected = artifact.triangle_count() as usize;
    assert!(expected > 0);
    assert_eq!(artifact.len(), encoded_len(expected));
    for triangle in artifact.triangles() {
        for vertex in triangle.vertices {
            assert!(vertex[2] >= -15.0 - 1e-4 && vertex[2] <= 17.0 + 1e-4);
        }
    }
}

#[test]
fn test_parametric_bracket_compiles() {
    let src = r#"
function plate(w, d, t) {
  return primitives.cuboid({ size: [w, d, t] })
}

function holes(count, spacing, r, t) {
  const result = []
  for (let i = 0; i < count; i++) {
    const x = (i - (count - 1) / 2) * spacing
    result.push(transforms.translate([x, 0, 0], primitives.cylinder({ radius: r, height: t * 2, segments: 16 })))
  }
  return result
}

function main() {
  const t = 4
  const base = plate(60, 20, t)
  return booleans.subtract(base, ...holes(3, 18, 2.5, t))
}
"#;
    let artifact = compile_default(src).unwrap();
    assert!(artifact.triangle_count() > 12);
}

#[test]
fn test_array_result_is_unioned() {
    let src = r#"
function main() {
  const cubeA = primitives.cube({ size: 10 })
  const sphereB = transforms.translate([20, 0, 0], primitives.sphere({ radius: 5, segments: 16 }))
  return [cubeA, sphereB]
}
"#;
    let ExecutionOutcome::Success(value) = execute(src) else {
        panic!("expected success");
    };
    let SolidOrCollection::Collection(items) = &value else {
        panic!("expected a collection");
    };
    assert_eq!(items.len(), 2);
    let CollectionItem::Solid(cube) = &items[0] else {
        panic!("expected a solid first");
    };
    let cube_volume = cube.signed_volume();

    let solid = reduce(value.clone(), &PolygonKernel::new()).unwrap();
    assert!(solid.signed_volume() > cube_volume);
    assert!((solid.bounds().max.x - 25.0).abs() < 1e-6);
}

#[test]
fn test_missing_main_is_a_runtime_failure() {
    assert_eq!(
        execute("const shape = primitives.cube({ size: 1 });"),
        ExecutionOutcome::RuntimeFailed(MISSING_MAIN.to_string())
    );
    let err = compile_default("const shape = 1;").unwrap_err();
    assert_eq!(err.category(), FailureCategory::RuntimeFailed);
    assert!(err.to_string().contains("main() function"));
}

#[test]
fn test_no_geometry_message() {
    let err = compile_default("function main() { return undefined; }").unwrap_err();
    assert!(err.to_string().ends_with("no geometry"), "{}", err);
}

#[test]
fn test_masked_import_does_not_hide_network_access() {
    let src = "const m = require('@jscad/modeling');\nconst main = () => { fetch('https://x.test'); return m.primitives.cube({ size: 1 }); };";
    let err = compile_default(src).unwrap_err();
    let PipelineError::SecurityRejected(SecurityRejection::Denylisted { classes, .. }) = err else {
        panic!("expected a security rejection, got {:?}", err);
    };
    assert_eq!(classes, vec![PatternClass::Network]);
}

#[test]
fn test_unknown_capabilities_fail_at_runtime() {
    let err = compile_default("function main() { return primitives.teapot({}); }").unwrap_err();
    assert_eq!(err.category(), FailureCategory::RuntimeFailed);
}

#[test]
fn test_runaway_program_times_out() {
    let budget = ExecutionBudget {
        max_steps: 200_000,
        timeout: Duration::from_secs(5),
        ..ExecutionBudget::default()
    };
    let err = compile(
        "function main() { let n = 0; while (true) { n++; } }",
        &budget,
        &CancellationToken::new(),
    )
    .unwrap_err();
    assert_eq!(err.category(), FailureCategory::Timeout);
}

#[test]
fn test_runaway_recursion_is_contained() {
    let err = compile_default("function f(n) { return f(n + 1); }\nfunction main() { return f(0); }")
        .unwrap_err();
    assert_eq!(err.category(), FailureCategory::RuntimeFailed);
    assert!(err.to_string().contains("call stack"));
}

#[test]
fn test_out_of_range_coordinates_fail_encoding() {
    let err = compile_default("const main = () => primitives.cuboid({ size: [1e300, 1, 1] });")
        .unwrap_err();
    assert_eq!(err.category(), FailureCategory::EncodingFailed);
}

#[test]
fn test_runaway_allocation_is_a_runtime_failure() {
    let src = r#"
        function main() {
            const keep = [];
            for (let i = 0; i < 400; i++) {
                const b = [];
                b.length = 1048576;
                keep.push(b);
            }
            return primitives.cube();
        }
    "#;
    let err = compile_default(src).unwrap_err();
    assert_eq!(err.category(), FailureCategory::RuntimeFailed);
    assert!(err.to_string().contains("allocation limit"));
}
