use crate::identity::domain::identity::IdentityId;
use crate::shared::category::Category;

const HERD_NAMES: &[&str] = &[
    "Mimosa", "Estrela", "Pintada", "Moreninha", "Branquinha", "Caramelo", "Pretinha", "Malhada",
    "Formosa", "Bonita", "Clarinha", "Rosinha", "Serena", "Vitória", "Aurora", "Bela", "Doce",
    "Flor", "Graça", "Hera", "Trovão", "Valente", "Bravo", "Capitão", "Guerreiro", "Forte", "Titã",
    "Rei", "Jaguar", "Sultão", "Barroso", "Manchado", "Pintado", "Gaúcho", "Cangaço", "Sertão",
    "Pampa", "Cerrado", "Chapadão", "Vaqueiro",
];

const PERSON_PREFIX: &str = "Visitor";

/// Picks a display name for a new identity.
///
/// Deterministic in the id: animals cycle through the herd-name list,
/// people get `Visitor_NNN`. A numeric suffix is appended until
/// `is_taken` accepts the name.
pub fn generate_name(
    category: Category,
    id: IdentityId,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    let base = match category {
        Category::Animal => {
            let index = (id.0.saturating_sub(1) % HERD_NAMES.len() as u64) as usize;
            HERD_NAMES[index].to_string()
        }
        Category::Person => format!("{PERSON_PREFIX}_{:03}", id.0),
    };

    let mut name = base.clone();
    let mut suffix = 2;
    while is_taken(&name) {
        name = format!("{base}_{suffix}");
        suffix += 1;
    }
    name
}

/// Turns a display name into something safe for a file name.
pub fn sanitize_for_path(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "identity".to_string()
    } else {
        safe
    }
}
