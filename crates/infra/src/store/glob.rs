//! Redis-style glob matching for key enumeration.
//!
//! Supports `*` (any run, including empty), `?` (exactly one character) and
//! `\` to escape the next character. Everything else matches literally.

/// Whether `candidate` matches `pattern`.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0usize, 0usize);
    // Position of the last `*` in the pattern and the candidate index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                c += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == candidate[c] {
                    p += 2;
                    c += 1;
                    continue;
                }
            }
            Some(&ch) if ch == candidate[c] => {
                p += 1;
                c += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, tried)) => {
                p = star + 1;
                c = tried + 1;
                backtrack = Some((star, tried + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}
