use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Returns a random string drawn from the 62 ASCII alphanumerics.
pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}
