// Seeding helper: prints an Argon2 PHC string for cirs_user.password_hash.

use std::io::{self, BufRead};

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};

fn main() {
    // Password from argv, or first line of stdin when piped.
    let password = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .expect("Usage: hashpass <password>  (or pipe it on stdin)");
            let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
            if trimmed.is_empty() {
                eprintln!("Usage: hashpass <password>  (or pipe it on stdin)");
                std::process::exit(2);
            }
            trimmed
        }
    };

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("argon2 hashing failed")
        .to_string();
    println!("{phc}");
}
