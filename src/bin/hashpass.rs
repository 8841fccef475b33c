//! Prints the argon2 hash of a password and an `INSERT` that seeds a login
//! with it, for bootstrapping the first admin of a fresh database.
//!
//! Usage: hashpass <username> <password> [role]

use anyhow::{Context, anyhow, bail};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

fn role_code(name: &str) -> anyhow::Result<i16> {
    Ok(match name {
        "patient" => 0,
        "admin" => 1,
        "owner" => 2,
        "dentist" => 3,
        "receptionist" => 4,
        "assistant" => 5,
        other => bail!("unknown role `{other}`"),
    })
}

fn sql_quote(s: &str) -> String {
    s.replace('\'', "''")
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let username = args.next().context("Usage: hashpass <username> <password> [role]")?;
    let password = args.next().context("Usage: hashpass <username> <password> [role]")?;
    let role = role_code(&args.next().unwrap_or_else(|| "admin".to_string()))?;

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("argon2 hash error: {e}"))?
        .to_string();

    println!("{phc}");
    println!(
        "INSERT INTO app_user (username, display_name, password_hash, roles) VALUES ('{u}', '{u}', '{phc}', {role});",
        u = sql_quote(&username),
    );
    Ok(())
}
