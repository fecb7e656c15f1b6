//! Format converter registrations, one per entity kind
//!
//! The platform's full schema declares many more scalar columns per type;
//! the stored-field lists here cover the columns the pipeline and its
//! collaborators touch. Unknown requested fields are dropped silently, so
//! adding columns later is additive-safe.

use std::collections::HashMap;
use std::sync::Arc;

use crate::augment::ViewerStateComputer;
use crate::model::{ObjectType, Row};
use crate::registry::{
    FormatConverter, Ownership, Rel, StructuralSchema, ROOT_FIELD,
};

/// Owner values carry no type tag on the wire. An organization always
/// stores `isOpenToNewMembers`; anything else is a user.
fn discriminate_owner(row: &Row) -> Option<ObjectType> {
    if row.contains_key("isOpenToNewMembers") {
        Some(ObjectType::Organization)
    } else {
        Some(ObjectType::User)
    }
}

/// Comment targets: a routine always stores `complexity`, a standard always
/// stores `props`; anything else is a project.
fn discriminate_commented_on(row: &Row) -> Option<ObjectType> {
    if row.contains_key("complexity") {
        Some(ObjectType::Routine)
    } else if row.contains_key("props") {
        Some(ObjectType::Standard)
    } else {
        Some(ObjectType::Project)
    }
}

const OWNER_OPTIONS: &[ObjectType] = &[ObjectType::User, ObjectType::Organization];
const COMMENTED_ON_OPTIONS: &[ObjectType] = &[
    ObjectType::Project,
    ObjectType::Routine,
    ObjectType::Standard,
];

fn converter(object_type: ObjectType) -> FormatConverter {
    FormatConverter {
        object_type,
        relationships: HashMap::new(),
        stored_fields: &[],
        supplemental_fields: &[],
        count_fields: &[],
        flagged_fields: &[],
        translated: false,
        probe_field: None,
        ownership: None,
        max_objects: None,
        mutable: true,
        schema: StructuralSchema::default(),
        transfer: None,
        supplemental: None,
    }
}

fn user() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            ("comments", Rel::Many(ObjectType::Comment)),
            ("projects", Rel::Many(ObjectType::Project)),
            ("memberships", Rel::Many(ObjectType::Member)),
        ]),
        stored_fields: &["id", "handle", "name", "status", "createdAt", "updatedAt"],
        supplemental_fields: &["isStarred"],
        count_fields: &[("projectsCount", "projects")],
        flagged_fields: &["handle", "name"],
        translated: true,
        ownership: Some(Ownership {
            user_field: Some("id"),
            org_field: None,
        }),
        schema: StructuralSchema {
            required_on_create: &["name"],
            string_bounds: &[("handle", 3, 16), ("name", 1, 128)],
        },
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: None,
            role_relation: None,
        })),
        ..converter(ObjectType::User)
    }
}

fn organization() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            ("members", Rel::Many(ObjectType::Member)),
            ("projects", Rel::Many(ObjectType::Project)),
            ("routines", Rel::Many(ObjectType::Routine)),
            ("standards", Rel::Many(ObjectType::Standard)),
            ("tags", Rel::Joined { through: "tag", to: ObjectType::Tag }),
        ]),
        stored_fields: &[
            "id",
            "handle",
            "isOpenToNewMembers",
            "createdAt",
            "updatedAt",
        ],
        supplemental_fields: &["isStarred", "role"],
        count_fields: &[("membersCount", "members"), ("projectsCount", "projects")],
        flagged_fields: &["handle"],
        translated: true,
        probe_field: Some("isOpenToNewMembers"),
        ownership: Some(Ownership {
            user_field: None,
            org_field: Some("id"),
        }),
        schema: StructuralSchema {
            required_on_create: &[],
            string_bounds: &[("handle", 3, 16)],
        },
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: None,
            role_relation: Some("members"),
        })),
        ..converter(ObjectType::Organization)
    }
}

fn member() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            ("user", Rel::One(ObjectType::User)),
            ("organization", Rel::One(ObjectType::Organization)),
        ]),
        stored_fields: &[
            "id",
            "role",
            "isAccepted",
            "userId",
            "organizationId",
            "createdAt",
            "updatedAt",
        ],
        ownership: Some(Ownership {
            user_field: None,
            org_field: Some("organizationId"),
        }),
        schema: StructuralSchema {
            required_on_create: &["userId", "organizationId"],
            string_bounds: &[],
        },
        ..converter(ObjectType::Member)
    }
}

fn project() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            (
                "owner",
                Rel::Union {
                    options: OWNER_OPTIONS,
                    discriminate: discriminate_owner,
                },
            ),
            ("parent", Rel::One(ObjectType::Project)),
            ("tags", Rel::Joined { through: "tag", to: ObjectType::Tag }),
            ("comments", Rel::Many(ObjectType::Comment)),
            ("routines", Rel::Many(ObjectType::Routine)),
        ]),
        stored_fields: &[
            "id",
            "handle",
            "score",
            "isComplete",
            "isPrivate",
            "createdAt",
            "updatedAt",
            "userId",
            "organizationId",
            "parentId",
        ],
        supplemental_fields: &["isStarred", "isUpvoted"],
        count_fields: &[
            ("commentsCount", "comments"),
            ("routinesCount", "routines"),
            ("tagsCount", "tags"),
        ],
        flagged_fields: &["handle"],
        translated: true,
        ownership: Some(Ownership {
            user_field: Some("userId"),
            org_field: Some("organizationId"),
        }),
        schema: StructuralSchema {
            required_on_create: &[],
            string_bounds: &[("handle", 3, 16)],
        },
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: Some("votes"),
            role_relation: None,
        })),
        ..converter(ObjectType::Project)
    }
}

fn routine() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            (
                "owner",
                Rel::Union {
                    options: OWNER_OPTIONS,
                    discriminate: discriminate_owner,
                },
            ),
            ("parent", Rel::One(ObjectType::Routine)),
            ("project", Rel::One(ObjectType::Project)),
            ("nodes", Rel::Many(ObjectType::RoutineNode)),
            ("nodeLinks", Rel::Many(ObjectType::NodeLink)),
            ("tags", Rel::Joined { through: "tag", to: ObjectType::Tag }),
            ("comments", Rel::Many(ObjectType::Comment)),
        ]),
        stored_fields: &[
            "id",
            "complexity",
            "isAutomatable",
            "isComplete",
            "isInternal",
            "isPrivate",
            "score",
            "createdAt",
            "updatedAt",
            "userId",
            "organizationId",
            "projectId",
            "parentId",
        ],
        supplemental_fields: &["isStarred", "isUpvoted"],
        count_fields: &[("commentsCount", "comments"), ("nodesCount", "nodes")],
        translated: true,
        probe_field: Some("complexity"),
        ownership: Some(Ownership {
            user_field: Some("userId"),
            org_field: Some("organizationId"),
        }),
        max_objects: Some(25_000),
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: Some("votes"),
            role_relation: None,
        })),
        ..converter(ObjectType::Routine)
    }
}

fn routine_node() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([("routine", Rel::One(ObjectType::Routine))]),
        stored_fields: &[
            "id",
            "columnIndex",
            "rowIndex",
            "nodeType",
            "routineId",
            "createdAt",
            "updatedAt",
        ],
        translated: true,
        ..converter(ObjectType::RoutineNode)
    }
}

fn node_link() -> FormatConverter {
    FormatConverter {
        stored_fields: &[
            "id",
            "fromId",
            "toId",
            "operation",
            "routineId",
            "createdAt",
            "updatedAt",
        ],
        ..converter(ObjectType::NodeLink)
    }
}

fn standard() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            (
                "owner",
                Rel::Union {
                    options: OWNER_OPTIONS,
                    discriminate: discriminate_owner,
                },
            ),
            ("tags", Rel::Joined { through: "tag", to: ObjectType::Tag }),
            ("comments", Rel::Many(ObjectType::Comment)),
            ("versions", Rel::Many(ObjectType::StandardVersion)),
        ]),
        stored_fields: &[
            "id",
            "name",
            "type",
            "props",
            "isFile",
            "isPrivate",
            "createdAt",
            "updatedAt",
            "userId",
            "organizationId",
        ],
        supplemental_fields: &["isStarred", "isUpvoted"],
        count_fields: &[("commentsCount", "comments")],
        flagged_fields: &["name"],
        translated: true,
        probe_field: Some("props"),
        ownership: Some(Ownership {
            user_field: Some("userId"),
            org_field: Some("organizationId"),
        }),
        schema: StructuralSchema {
            required_on_create: &["name"],
            string_bounds: &[("name", 1, 128), ("props", 1, 8192)],
        },
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: Some("votes"),
            role_relation: None,
        })),
        ..converter(ObjectType::Standard)
    }
}

fn standard_version() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([(ROOT_FIELD, Rel::One(ObjectType::Standard))]),
        stored_fields: &[
            "id",
            "versionIndex",
            "versionLabel",
            "isLatest",
            "standardId",
            "createdAt",
        ],
        // Versions are written by the platform when a standard changes,
        // never mutated directly through the public pipeline.
        mutable: false,
        ..converter(ObjectType::StandardVersion)
    }
}

fn tag() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([("createdBy", Rel::One(ObjectType::User))]),
        stored_fields: &["id", "tag", "createdAt", "updatedAt", "createdById"],
        supplemental_fields: &["isStarred"],
        flagged_fields: &["tag"],
        translated: true,
        ownership: Some(Ownership {
            user_field: Some("createdById"),
            org_field: None,
        }),
        schema: StructuralSchema {
            required_on_create: &["tag"],
            string_bounds: &[("tag", 1, 128)],
        },
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: None,
            role_relation: None,
        })),
        ..converter(ObjectType::Tag)
    }
}

fn comment() -> FormatConverter {
    FormatConverter {
        relationships: HashMap::from([
            (
                "creator",
                Rel::Union {
                    options: OWNER_OPTIONS,
                    discriminate: discriminate_owner,
                },
            ),
            (
                "commentedOn",
                Rel::Union {
                    options: COMMENTED_ON_OPTIONS,
                    discriminate: discriminate_commented_on,
                },
            ),
        ]),
        stored_fields: &[
            "id",
            "score",
            "createdAt",
            "updatedAt",
            "userId",
            "projectId",
            "routineId",
            "standardId",
        ],
        supplemental_fields: &["isStarred", "isUpvoted"],
        translated: true,
        ownership: Some(Ownership {
            user_field: Some("userId"),
            org_field: None,
        }),
        supplemental: Some(Arc::new(ViewerStateComputer {
            star_relation: Some("stars"),
            vote_relation: Some("votes"),
            role_relation: None,
        })),
        ..converter(ObjectType::Comment)
    }
}

fn star() -> FormatConverter {
    FormatConverter {
        stored_fields: &[
            "id",
            "starredById",
            "createdAt",
            "projectId",
            "routineId",
            "standardId",
            "organizationId",
            "commentId",
            "tagId",
            "userId",
        ],
        ownership: Some(Ownership {
            user_field: Some("starredById"),
            org_field: None,
        }),
        ..converter(ObjectType::Star)
    }
}

fn vote() -> FormatConverter {
    FormatConverter {
        stored_fields: &[
            "id",
            "votedById",
            "isUpvote",
            "createdAt",
            "projectId",
            "routineId",
            "standardId",
            "commentId",
        ],
        ownership: Some(Ownership {
            user_field: Some("votedById"),
            org_field: None,
        }),
        ..converter(ObjectType::Vote)
    }
}

pub(super) fn all() -> Vec<FormatConverter> {
    vec![
        user(),
        organization(),
        member(),
        project(),
        routine(),
        routine_node(),
        node_link(),
        standard(),
        standard_version(),
        tag(),
        comment(),
        star(),
        vote(),
    ]
}
