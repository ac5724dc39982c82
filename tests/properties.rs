//! End-to-end properties of the pass pipeline.
//!
//! These tests drive the public API only:
//! 1. Build a typed function with `FunctionBuilder`
//! 2. Run a recipe through the `PassManager`
//! 3. Check the result is valid SSA, fully typed, and rewritten as expected
//! 4. Check that running the same recipe again changes nothing

use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use matssa::{
    compiler::{DeadCodeEliminationPass, TrivialLoopEliminationPass},
    prelude::*,
};

fn context() -> CompilerContext {
    CompilerContext::new(Arc::new(FunctionRegistry::with_builtins()))
}

fn run_recipe(instance: &mut FunctionInstance, recipe: &str) -> Result<bool> {
    let manager = PassManager::new(recipe.parse()?, PipelineConfig::strict());
    let run = manager.run(instance, &context())?;
    Ok(run.changed())
}

/// Every variable the body mentions has an entry in the type map.
fn assert_fully_typed(instance: &FunctionInstance) {
    for (block, _, instruction) in instance.body.instructions() {
        for variable in instruction.outputs().into_iter().chain(instruction.inputs()) {
            assert!(
                instance.types.get(variable).is_some(),
                "{variable} in block #{block} has no type"
            );
        }
    }
}

/// `x = 0; for i = s:k:e, x = x + i; end; y = x * x`
fn accumulate(start: f64, interval: f64, end: f64) -> FunctionInstance {
    FunctionBuilder::new("accumulate").build_with(|f| {
        f.scalars(&["x$2", "x$3", "x$4", "y$1"]);
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.number("s$1", start);
            b.number("k$1", interval);
            b.number("e$1", end);
            b.number("x$1", 0.0);
            b.for_loop("s$1", "k$1", "e$1", 1, 2);
        });
        f.block(1, |b| {
            b.phi("x$2", &[(0, "x$1"), (1, "x$3")]);
            b.iter("i$1");
            b.call("plus", &["x$3"], &["x$2", "i$1"]);
        });
        f.block(2, |b| {
            b.phi("x$4", &[(0, "x$1"), (1, "x$3")]);
            b.call("times", &["y$1"], &["x$4", "x$4"]);
        });
    })
}

#[test]
fn test_dead_store_allocation_removed() -> Result<()> {
    let mut instance = FunctionBuilder::new("f").build_with(|f| {
        f.scalars(&["n$1", "y$1"]);
        f.matrix("x$1", Shape::with_rank(2));
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.argument("n$1", 0);
            b.call("zeros", &["x$1"], &["n$1"]);
            b.call("numel", &["y$1"], &["x$1"]);
        });
    });

    assert!(run_recipe(
        &mut instance,
        "redundant-allocation-elimination, dead-code-elimination"
    )?);
    assert_eq!(
        instance.body.to_string(),
        "Function f -> y$1\nblock #0:\n  n$1 = arg 0\n  $zero$1 = 0\n  \
         $dimension$1 = max n$1, $zero$1\n  y$1 = times $dimension$1, $dimension$1\n"
    );
    assert_fully_typed(&instance);
    Ok(())
}

#[test]
fn test_empty_loop_deleted() -> Result<()> {
    let mut instance = accumulate(1.0, 0.0, 1.0);
    assert!(run_recipe(
        &mut instance,
        "trivial-loop-elimination, dead-code-elimination, block-reordering"
    )?);

    assert_eq!(instance.body.block_count(), 1);
    let rendered = instance.body.to_string();
    assert!(!rendered.contains("for "));
    assert!(rendered.contains("x$4 = x$1"));
    assert!(rendered.contains("y$1 = times x$4, x$4"));
    assert_fully_typed(&instance);
    Ok(())
}

#[test]
fn test_two_iteration_loop_kept() -> Result<()> {
    let mut instance = accumulate(1.0, 1.0, 2.0);
    let before = instance.clone();
    assert!(!run_recipe(&mut instance, "trivial-loop-elimination, block-reordering")?);
    assert_eq!(instance, before);
    Ok(())
}

#[test]
fn test_horzcat_of_two_scalars() -> Result<()> {
    let mut instance = FunctionBuilder::new("f").build_with(|f| {
        f.scalars(&["a$1", "b$1"]);
        f.matrix("y$1", Shape::row(Some(2)));
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.argument("a$1", 0);
            b.argument("b$1", 1);
            b.call("horzcat", &["y$1"], &["a$1", "b$1"]);
        });
    });

    assert!(run_recipe(&mut instance, "horzcat-elimination, dead-code-elimination")?);
    let rendered = instance.body.to_string();
    assert!(!rendered.contains("horzcat"));
    assert_eq!(rendered.matches("simple_set").count(), 2);
    assert_fully_typed(&instance);
    Ok(())
}

#[test]
fn test_nested_horzcat_flattened() -> Result<()> {
    let mut instance = FunctionBuilder::new("f").build_with(|f| {
        f.scalars(&["x1$1", "x2$1", "a$1", "b$1"]);
        f.matrix("X3$1", Shape::row(Some(2)));
        f.matrix("y$1", Shape::row(Some(4)));
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.argument("x1$1", 0);
            b.argument("x2$1", 1);
            b.argument("a$1", 2);
            b.argument("b$1", 3);
            b.call("horzcat", &["X3$1"], &["a$1", "b$1"]);
            b.call("horzcat", &["y$1"], &["x1$1", "X3$1", "x2$1"]);
        });
    });

    assert!(run_recipe(&mut instance, "horzcat-elimination, dead-code-elimination")?);
    let rendered = instance.body.to_string();
    assert!(!rendered.contains("horzcat"));
    assert_eq!(rendered.matches("matisse_new_array_from_dims").count(), 1);
    assert_eq!(rendered.matches("simple_set").count(), 4);
    Ok(())
}

/// A producer loop filling `X` followed by a consumer loop summing it up to `second_end`.
fn producer_consumer(second_end: &str) -> FunctionInstance {
    FunctionBuilder::new("f").build_with(|f| {
        for matrix in ["A$1", "X$0", "X$1", "X$2", "X$3"] {
            f.matrix(matrix, Shape::row(None));
        }
        f.scalars(&["n$1", "m$1", "k$1", "a$1", "v$1", "s$2", "s$3", "s$4", "w$1"]);
        f.outputs(&["s$4"]);
        f.block(0, |b| {
            b.argument("A$1", 0);
            b.argument("k$1", 1);
            b.call("numel", &["n$1"], &["A$1"]);
            b.number("one$1", 1.0);
            b.call("zeros", &["X$0"], &["one$1", "n$1"]);
            b.for_loop("one$1", "one$1", "n$1", 1, 2);
        });
        f.block(1, |b| {
            b.phi("X$1", &[(0, "X$0"), (1, "X$2")]);
            b.iter("i$1");
            b.simple_get("a$1", "A$1", &["i$1"]);
            b.call("times", &["v$1"], &["a$1", "a$1"]);
            b.simple_set("X$2", "X$1", &["i$1"], "v$1");
        });
        f.block(2, |b| {
            b.phi("X$3", &[(0, "X$0"), (1, "X$2")]);
            b.call("numel", &["m$1"], &["X$3"]);
            b.number("s$1", 0.0);
            b.for_loop("one$1", "one$1", second_end, 3, 4);
        });
        f.block(3, |b| {
            b.phi("s$2", &[(2, "s$1"), (3, "s$3")]);
            b.iter("j$1");
            b.simple_get("w$1", "X$3", &["j$1"]);
            b.call("plus", &["s$3"], &["s$2", "w$1"]);
        });
        f.block(4, |b| {
            b.phi("s$4", &[(2, "s$1"), (3, "s$3")]);
        });
    })
}

#[test]
fn test_fusion_boundary() -> Result<()> {
    let recipe = "loop-fusion, dead-code-elimination, block-reordering";

    let mut same_range = producer_consumer("m$1");
    assert!(run_recipe(&mut same_range, recipe)?);
    assert_eq!(same_range.body.to_string().matches("for ").count(), 1);
    assert_eq!(same_range.body.block_count(), 3);
    assert_fully_typed(&same_range);

    let mut other_range = producer_consumer("k$1");
    run_recipe(&mut other_range, recipe)?;
    assert_eq!(other_range.body.to_string().matches("for ").count(), 2);
    Ok(())
}

#[test]
fn test_optimizing_recipe_is_idempotent() -> Result<()> {
    let mut instance = producer_consumer("m$1");
    let manager = PassManager::new(Recipe::optimizing(), PipelineConfig::strict());
    let ctx = context();

    manager.run(&mut instance, &ctx)?;
    let once = instance.clone();
    let second = manager.run(&mut instance, &ctx)?;
    assert!(!second.changed(), "changed by {:?}", second.changed_by);
    assert_eq!(instance, once);
    Ok(())
}

/// Runs every pass of `recipe` in order, checking after each one that no type entry that
/// existed before it was changed or dropped.
fn assert_type_transparent(instance: &mut FunctionInstance, recipe: &Recipe) {
    let ctx = context();
    for pass in recipe.instantiate() {
        let before = instance.types.clone();
        pass.run_on_function(instance, &ctx).expect("pass");
        for (name, ty) in before.iter() {
            assert_eq!(
                instance.types.get(name),
                Some(ty),
                "{} changed the type of {name}",
                pass.name()
            );
        }
    }
    validate(&instance.body).expect("valid after the recipe");
    assert_fully_typed(instance);
}

#[test]
fn test_passes_keep_existing_types() {
    let recipe = Recipe::optimizing();
    let horzcat = FunctionBuilder::new("f").build_with(|f| {
        f.scalars(&["a$1", "b$1"]);
        f.matrix("y$1", Shape::row(Some(2)));
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.argument("a$1", 0);
            b.argument("b$1", 1);
            b.call("horzcat", &["y$1"], &["a$1", "b$1"]);
        });
    });
    let dead_store = FunctionBuilder::new("f").build_with(|f| {
        f.scalars(&["n$1", "y$1"]);
        f.matrix("x$1", Shape::with_rank(2));
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.argument("n$1", 0);
            b.call("zeros", &["x$1"], &["n$1"]);
            b.call("numel", &["y$1"], &["x$1"]);
        });
    });

    for mut instance in [
        producer_consumer("m$1"),
        producer_consumer("k$1"),
        accumulate(1.0, 1.0, 1.0),
        accumulate(1.0, 1.0, 5.0),
        horzcat,
        dead_store,
    ] {
        assert_type_transparent(&mut instance, &recipe);
    }
}

#[test]
fn test_optimizing_recipe_lowers_end() -> Result<()> {
    // y = A(end, end)
    let mut instance = FunctionBuilder::new("last").build_with(|f| {
        f.matrix("A$1", Shape::with_rank(2));
        f.scalars(&["r$1", "c$1", "y$1"]);
        f.outputs(&["y$1"]);
        f.block(0, |b| {
            b.argument("A$1", 0);
            b.end("r$1", "A$1", 0, 2);
            b.end("c$1", "A$1", 1, 2);
            b.simple_get("y$1", "A$1", &["r$1", "c$1"]);
        });
    });
    let manager = PassManager::new(Recipe::optimizing(), PipelineConfig::strict());
    manager.run(&mut instance, &context())?;

    let text = instance.body.to_string();
    assert!(!text.contains(" = end "), "{text}");
    assert_eq!(text.matches(" = size A$1, ").count(), 2);
    assert_fully_typed(&instance);
    Ok(())
}

#[test]
fn test_unknown_pass_rejected() {
    let result = "dead-code-elimination, loop-unrolling".parse::<Recipe>();
    assert!(matches!(result, Err(Error::UnknownPass(name)) if name.trim() == "loop-unrolling"));
}

proptest! {
    #[test]
    fn prop_trivial_loop_elimination(start in -3i32..=3, interval in -2i32..=2, end in -3i32..=3) {
        let mut instance = accumulate(f64::from(start), f64::from(interval), f64::from(end));
        let ctx = context();
        let pass = TrivialLoopEliminationPass::new();

        let changed = pass.run_on_function(&mut instance, &ctx).expect("pass");
        validate(&instance.body).expect("valid after the pass");

        let empty = interval == 0
            || (interval > 0 && start > end)
            || (interval < 0 && start < end);
        let single = !empty && start == end;
        prop_assert_eq!(changed, empty || single);
        prop_assert_eq!(instance.body.to_string().contains("for "), !changed);

        let once = instance.clone();
        prop_assert!(!pass.run_on_function(&mut instance, &ctx).expect("pass"));
        prop_assert_eq!(instance, once);
    }

    #[test]
    fn prop_type_transparency(
        start in -3i32..=3,
        interval in -2i32..=2,
        end in -3i32..=3,
        same_range in any::<bool>(),
    ) {
        let mut looped = accumulate(f64::from(start), f64::from(interval), f64::from(end));
        assert_type_transparent(&mut looped, &Recipe::optimizing());

        let mut paired = producer_consumer(if same_range { "m$1" } else { "k$1" });
        assert_type_transparent(&mut paired, &Recipe::optimizing());
    }

    #[test]
    fn prop_dead_code_keeps_outputs(length in 1usize..12, keep in 0usize..12) {
        let keep = keep % length;
        let names: Vec<String> = (1..=length).map(|i| format!("t${i}")).collect();
        let mut instance = FunctionBuilder::new("chain").build_with(|f| {
            f.scalars(&["a$1"]);
            for name in &names {
                f.scalars(&[name.as_str()]);
            }
            f.outputs(&[names[keep].as_str()]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                let mut previous = "a$1".to_string();
                for name in &names {
                    b.call("plus", &[name.as_str()], &[previous.as_str(), "a$1"]);
                    previous.clone_from(name);
                }
            });
        });

        let ctx = context();
        DeadCodeEliminationPass::new().run_on_function(&mut instance, &ctx).expect("pass");
        validate(&instance.body).expect("valid after the pass");
        prop_assert_eq!(instance.body.blocks()[0].len(), keep + 2);
        prop_assert!(instance.body.definition(&names[keep]).is_some());
        assert_fully_typed(&instance);
    }
}
