use volflow::VolflowError;

pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;

/// Exit code for a library error: numerical failures are execution errors,
/// everything else points at the inputs
pub fn for_error(error: &VolflowError) -> i32 {
    match error {
        VolflowError::NumericalError(_) | VolflowError::NotPositiveDefinite(_) => EXECUTION_ERROR,
        _ => INPUT_ERROR,
    }
}
