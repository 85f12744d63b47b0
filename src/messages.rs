//! Fixed display text used by the presence resolver

/// Large image asset and its hover text
pub const LARGE_IMAGE_KEY: &str = "claude-code";
pub const LARGE_IMAGE_TEXT: &str = "Claude Code";

/// Fallback details when a single session's own details are unusable
pub const DEFAULT_DETAILS: &str = "Using Claude Code";
/// Fallback state line for a single session
pub const DEFAULT_STATE: &str = "Working";
/// Stats line when there is nothing to report yet
pub const JUST_STARTED: &str = "Just getting started";
/// Fallback for an unusable project list
pub const DEFAULT_PROJECT_LIST: &str = "Multiple projects";

/// Placeholder substituted with the session count in the overflow pool
pub const COUNT_PLACEHOLDER: &str = "{n}";

pub const TWO_SESSIONS: &[&str] = &[
    "Dual-wielding codebases",
    "Split-brain mode engaged",
    "Two tabs, zero regrets",
    "Pair programming with myself",
    "Double-dipping in code",
    "Ambidextrous coding",
    "Main character in two repos",
    "Living my best double life",
    "Two codebases, one vibe",
    "Multiverse of madness (lite)",
    "Bilingual in TypeScript",
    "Plot twist: two repos at once",
];

pub const THREE_SESSIONS: &[&str] = &[
    "Juggling 3 codebases somehow",
    "Triple threat detected",
    "Three-ring circus",
    "Hat trick of repositories",
    "Tri-wielding codebases",
    "Three projects walk into a bar...",
    "Hitting a 3-pointer in code",
    "Trilogy arc in progress",
    "Doing a code speedrun x3",
    "Three repos no thoughts",
    "Third time's the charm (right?)",
    "Triforce of productivity",
];

pub const FOUR_SESSIONS: &[&str] = &[
    "4 parallel universes deep",
    "Quadruple-booked and shipping",
    "One for each brain cell",
    "Four-dimensional debugging",
    "Context-switching at the speed of light",
    "Four projects, one trenchcoat",
    "This is my 4th personality",
    "Quad-core workflow unlocked",
    "4 repos and a dream",
    "Into the quadraverse",
    "Fantastic 4 (repositories)",
    "Hitting the quad combo",
];

/// Five or more sessions; every entry carries [`COUNT_PLACEHOLDER`]
pub const OVERFLOW_SESSIONS: &[&str] = &[
    "Send help ({n} projects)",
    "This is fine. ({n} projects)",
    "{n} projects, no thoughts, just vibes",
    "{n}-way merge conflict with reality",
    "Someone stop me ({n} projects)",
    "My RAM filed a complaint ({n} projects)",
    "Achieving {n}-lightenment",
    "Operating on {n} codebases simultaneously",
    "{n} repos and no signs of stopping",
    "Gone feral ({n} projects)",
    "{n} tabs open, emotionally unavailable",
    "{n} projects deep, send snacks",
    "Built different ({n} projects)",
    "{n} repos, running on caffeine",
    "We call this the {n}x developer",
    "Not a phase, it's {n} projects",
];

pub const MULTI_SESSION_TOOLTIPS: &[&str] = &[
    "Each codebase thinks it's the favorite",
    "Technically I'm one Claude in a trenchcoat",
    "My context window needs a vacation",
    "Alt-tabbing at the speed of thought",
    "They don't know I'm also in other repos",
    "Running on vibes and vector embeddings",
    "Parallel execution unlocked",
    "One model, many dreams",
    "I contain multitudes (of sessions)",
    "Plot twist: they're all the same monorepo",
    "Task manager: sweating nervously",
    "Living rent-free in multiple repos",
    "Born to code, forced to context-switch",
    "Multithreaded by necessity",
    "Schrödinger's codebase: all edited at once",
    "No thoughts, just git diffs",
    "POV: you opened one more terminal",
    "This is my multiverse era",
    "Gaslit, gatekept, git rebased",
    "Not me context-switching again",
    "Main character energy across repos",
    "Slay (multiple codebases)",
    "The voices (terminals) are talking to me",
    "Rotating between existential code crises",
    "In my parallel processing era",
];

/// Details pool for a given session count (2, 3, 4, or the overflow pool)
pub fn pool_for_count(count: usize) -> &'static [&'static str] {
    match count {
        2 => TWO_SESSIONS,
        3 => THREE_SESSIONS,
        4 => FOUR_SESSIONS,
        _ => OVERFLOW_SESSIONS,
    }
}
