use volflow::matrix_io::read_matrix_csv;
use volflow::{grad2fmrivols, Atlas};

use crate::cli::Grad2volArgs;
use crate::exit_codes;

pub fn execute(args: Grad2volArgs) -> i32 {
    let atlas = match Atlas::load(&args.atlas) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let gradients = match read_matrix_csv(&args.gradients) {
        Ok(m) => m.data,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    if gradients.iter().any(|v| !v.is_finite()) {
        eprintln!(
            "Error: gradient table '{}' contains missing or non-finite values",
            args.gradients.display()
        );
        return exit_codes::INPUT_ERROR;
    }

    log::info!(
        "Projecting {} gradient(s) over {} regions",
        gradients.ncols(),
        gradients.nrows()
    );

    let volumes = match grad2fmrivols(&gradients, &atlas, args.image_dim, args.background) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    match volumes.save(&args.output) {
        Ok(paths) => {
            for path in paths {
                println!("{}", path.display());
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
