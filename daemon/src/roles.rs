/// UI element role filtering and click classification.
///
/// "Content changed" notifications arrive for every redraw of every element in
/// the watched application. Most of them are layout or chrome noise, so roles
/// are grouped and whole groups are ignored by default. The effective ignore
/// set is computed once at startup from four comma-separated env lists:
///
///   FOLEY_ENABLE_GROUP   groups to stop ignoring
///   FOLEY_DISABLE_GROUP  groups to ignore (again)
///   FOLEY_IGNORE_ROLES   individual roles to ignore
///   FOLEY_INCLUDE_ROLES  individual roles to stop ignoring
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::event::names;

pub const ENABLE_GROUP_VAR: &str = "FOLEY_ENABLE_GROUP";
pub const DISABLE_GROUP_VAR: &str = "FOLEY_DISABLE_GROUP";
pub const IGNORE_ROLES_VAR: &str = "FOLEY_IGNORE_ROLES";
pub const INCLUDE_ROLES_VAR: &str = "FOLEY_INCLUDE_ROLES";

const ROLES_STRUCTURAL: &[&str] = &[
    "AXSplitGroup", "AXSplitter", "AXGroup", "AXBox", "AXDrawer", "AXGrowArea",
    "AXMatte", "AXRuler", "AXRulerMarker", "AXGrid", "AXColumn", "AXRow",
];

const ROLES_WEB: &[&str] = &["AXWebArea", "AXLink", "AXList"];

// Text fields would double up with the key sounds.
const ROLES_INPUT: &[&str] = &["AXTextField", "AXTextArea"];

const ROLES_MENUS: &[&str] = &[
    "AXToolbar", "AXMenu", "AXMenuItem", "AXMenuBar", "AXMenuBarItem",
    "AXPopover", "AXHelpTag", "AXSystemWide",
];

const ROLES_CONTROLS: &[&str] = &[
    "AXCheckBox", "AXRadioButton", "AXRadioGroup", "AXDisclosureTriangle",
    "AXSlider", "AXValueIndicator", "AXRelevanceIndicator", "AXBusyIndicator",
    "AXButton",
];

const ROLES_UNKNOWN: &[&str] = &["AXUnknown", "Unknown"];

/// Group name (lower-case) → member roles.
pub type RoleGroups = HashMap<String, HashSet<String>>;

/// The built-in groups. All of them are ignored unless enabled.
pub fn default_groups() -> RoleGroups {
    [
        ("structural", ROLES_STRUCTURAL),
        ("web", ROLES_WEB),
        ("input", ROLES_INPUT),
        ("menus", ROLES_MENUS),
        ("controls", ROLES_CONTROLS),
        ("unknown", ROLES_UNKNOWN),
    ]
    .into_iter()
    .map(|(name, roles)| {
        (name.to_string(), roles.iter().map(|r| r.to_string()).collect())
    })
    .collect()
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Computes the ignore set. Steps run in this order, later ones winning:
/// all groups → enabled groups removed → disabled groups added →
/// explicit ignores added → explicit includes removed.
///
/// Group names are case-insensitive; unknown groups are skipped.
pub fn effective_ignore_set(
    groups: &RoleGroups,
    enable_groups: &[String],
    disable_groups: &[String],
    explicit_ignore: &[String],
    explicit_include: &[String],
) -> HashSet<String> {
    let lookup = |name: &String| groups.get(&name.to_lowercase());

    let mut ignored: HashSet<String> = groups.values().flatten().cloned().collect();

    for roles in enable_groups.iter().filter_map(lookup) {
        ignored.retain(|r| !roles.contains(r));
    }
    for roles in disable_groups.iter().filter_map(lookup) {
        ignored.extend(roles.iter().cloned());
    }
    ignored.extend(explicit_ignore.iter().cloned());
    for role in explicit_include {
        ignored.remove(role);
    }
    ignored
}

/// Which window button a click landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowControl {
    Close,
    Minimize,
    Zoom,
}

impl WindowControl {
    pub fn event_name(self) -> &'static str {
        match self {
            WindowControl::Close => names::WINDOW_CLOSE,
            WindowControl::Minimize => names::WINDOW_MIN,
            WindowControl::Zoom => names::WINDOW_ZOOM,
        }
    }

    fn from_subrole(subrole: &str) -> Option<Self> {
        match subrole {
            "AXCloseButton" => Some(WindowControl::Close),
            "AXMinimizeButton" => Some(WindowControl::Minimize),
            "AXZoomButton" => Some(WindowControl::Zoom),
            _ => None,
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("close") {
            Some(WindowControl::Close)
        } else if label.contains("minimize") || label.contains("minimise") {
            Some(WindowControl::Minimize)
        } else if label.contains("zoom") || label.contains("fullscreen") {
            Some(WindowControl::Zoom)
        } else {
            None
        }
    }
}

/// Accessibility attributes of a single UI element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementInfo {
    pub role: String,
    pub subrole: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Screen coordinates of a click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The element under a click plus its ancestors, nearest first.
#[derive(Debug, Clone, Default)]
pub struct HitTest {
    pub element: ElementInfo,
    pub ancestors: Vec<ElementInfo>,
}

/// Platform accessibility hit-testing. Implementations may block; callers run
/// them off the input thread.
pub trait ElementInspector: Send + Sync {
    fn hit_test(&self, point: Point) -> Option<HitTest>;
}

/// Outcome of classifying an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClass {
    WindowControl(WindowControl),
    IgnoredContent,
    SignificantContent,
}

/// How many ancestors are inspected when the clicked element is an icon or
/// label inside the actual button.
const MAX_ANCESTOR_DEPTH: usize = 3;

/// The startup-computed ignore set plus the classification rules.
#[derive(Debug, Clone)]
pub struct RoleFilter {
    ignored: HashSet<String>,
}

impl RoleFilter {
    pub fn new(ignored: HashSet<String>) -> Self {
        Self { ignored }
    }

    /// Builds the filter from the default groups and the `FOLEY_*` role
    /// variables found in `vars`.
    pub fn from_env<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let list = |name: &str| vars.get(name).map(|v| split_list(v)).unwrap_or_default();

        let enable = list(ENABLE_GROUP_VAR);
        let disable = list(DISABLE_GROUP_VAR);
        let ignore = list(IGNORE_ROLES_VAR);
        let include = list(INCLUDE_ROLES_VAR);
        debug!(?enable, ?disable, ?ignore, ?include, "role filter overrides");

        Self::new(effective_ignore_set(
            &default_groups(),
            &enable,
            &disable,
            &ignore,
            &include,
        ))
    }

    pub fn is_ignored(&self, role: &str) -> bool {
        self.ignored.contains(role)
    }

    /// Classifies a content-change notification by the element's role.
    pub fn classify_content(&self, role: &str) -> RoleClass {
        if self.is_ignored(role) || role.contains("Unknown") {
            RoleClass::IgnoredContent
        } else {
            RoleClass::SignificantContent
        }
    }

    /// Classifies a click. Window buttons are recognised by subrole on the
    /// element or one of its nearest ancestors, then by the element's title
    /// or description text.
    pub fn classify(&self, hit: &HitTest) -> RoleClass {
        match window_control(hit) {
            Some(control) => RoleClass::WindowControl(control),
            None => self.classify_content(&hit.element.role),
        }
    }
}

/// Finds the window button a hit-test landed on, if any.
pub fn window_control(hit: &HitTest) -> Option<WindowControl> {
    let by_subrole = std::iter::once(&hit.element)
        .chain(hit.ancestors.iter().take(MAX_ANCESTOR_DEPTH))
        .find_map(|el| el.subrole.as_deref().and_then(WindowControl::from_subrole));
    if by_subrole.is_some() {
        return by_subrole;
    }

    [&hit.element.title, &hit.element.description]
        .into_iter()
        .flatten()
        .find_map(|label| WindowControl::from_label(label))
}
