#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Pipeline actions that take no argument; each runs one step to completion.
pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "new",
        action: "new_run",
    },
    CommandSpec {
        command: "brief",
        action: "build_brief",
    },
    CommandSpec {
        command: "research",
        action: "find_cases",
    },
    CommandSpec {
        command: "spine",
        action: "build_spine",
    },
    CommandSpec {
        command: "draft",
        action: "draft_script",
    },
    CommandSpec {
        command: "split",
        action: "split_acts",
    },
    CommandSpec {
        command: "score",
        action: "score_acts",
    },
    CommandSpec {
        command: "patch",
        action: "patch_acts",
    },
    CommandSpec {
        command: "export",
        action: "export_docx",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

/// Commands whose whole argument string is one free-text value.
pub(crate) const RAW_ARG_COMMANDS: &[(CommandSpec, &str)] = &[
    (
        CommandSpec {
            command: "tone",
            action: "set_tone",
        },
        "tone",
    ),
    (
        CommandSpec {
            command: "mode",
            action: "set_brief_mode",
        },
        "mode",
    ),
    (
        CommandSpec {
            command: "text",
            action: "set_thumbnail_text",
        },
        "text",
    ),
];

pub(crate) const THUMB_COMMAND: CommandSpec = CommandSpec {
    command: "thumb",
    action: "set_thumbnail",
};

pub(crate) const PICK_COMMAND: CommandSpec = CommandSpec {
    command: "pick",
    action: "select_case",
};

pub(crate) const WORDS_COMMAND: CommandSpec = CommandSpec {
    command: "words",
    action: "set_word_range",
};

pub(crate) const PASSES_COMMAND: CommandSpec = CommandSpec {
    command: "passes",
    action: "set_max_passes",
};

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/new",
    "/thumb <path> [hint]",
    "/text <on-image text>",
    "/mode <heuristic|fixed-template>",
    "/brief",
    "/research",
    "/pick <n>",
    "/spine",
    "/tone <preset>",
    "/words <min> <max>",
    "/passes <n>",
    "/draft",
    "/split",
    "/score",
    "/patch",
    "/export",
    "/status",
    "/help",
    "/quit",
];
