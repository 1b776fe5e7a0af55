use fast3d_soft::{memory::Rdram, MemoryError};

use run_tests::run_tests;

mod scenes;

type BuildFn = fn() -> Result<Rdram, MemoryError>;

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: &'static str,
    pub build: BuildFn,
}

fn test_cases() -> Vec<TestCase> {
    let case = |name, build: BuildFn| TestCase { name, build };
    vec![
        case("gouraud_triangle", scenes::gouraud_triangle),
        case("near_clip", scenes::near_clip),
        case("perspective_floor", scenes::perspective_floor),
        case("checker_quad", scenes::checker_quad),
        case("modulated_quad", scenes::modulated_quad),
        case("depth_order", scenes::depth_order),
        case("alpha_blend", scenes::alpha_blend),
        case("fog_ramp", scenes::fog_ramp),
        case("lit_fan", scenes::lit_fan),
        case("copy_rects", scenes::copy_rects),
        case("nested_lists", scenes::nested_lists),
    ]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    run_tests(test_cases())
}
