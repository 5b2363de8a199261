/// Constructor selection mode used by the standard provider.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub enum ConstructorSelection {
    /// The plan must carry exactly one constructor directive.
    Unique,
    /// Directives are ranked by how many of their targets can be satisfied;
    /// a tie at the top score is an error.
    #[default]
    Scored,
}

/// Kernel-wide settings, fixed at build time.
///
/// ## Fields
/// - `constructor_selection`: how the standard provider picks a constructor
///   directive when a plan declares more than one.
/// - `allow_none`: if `true`, a provider or parameter yielding no value
///   injects nothing instead of failing the resolution.
/// - `max_depth`: hard bound on request nesting. Exceeding it turns runaway
///   recursion (typically an undetected dependency cycle) into an error
///   instead of a stack overflow.
/// - `detect_cycles`: walk the ancestor chain before constructing and fail
///   early when the same binding is already mid-construction. Off by default;
///   the depth bound is the backstop.
#[derive(Clone, Copy)]
pub struct Settings {
    pub constructor_selection: ConstructorSelection,
    pub allow_none: bool,
    pub max_depth: usize,
    pub detect_cycles: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            constructor_selection: ConstructorSelection::default(),
            allow_none: false,
            max_depth: 128,
            detect_cycles: false,
        }
    }
}
