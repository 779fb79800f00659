//! Fixup tables for the agent releases the sandbox knows

use crate::helpers::{make_fixup_helpers, HelperFactory};
use cage_artifact::{FixupEntry, FixupSet, Integrity};
use cage_parser::FixupTables;

/// Body digest of agent 2.117.0_prod
/// (`sha256-CIe1ebNh5QUBxPYMVZwwj7mnJnalruqUj6Wt7JSg3oM=`)
pub const AGENT_2_117_0_BODY: Integrity = Integrity::new([
    0x08, 0x87, 0xb5, 0x79, 0xb3, 0x61, 0xe5, 0x05, 0x01, 0xc4, 0xf6, 0x0c, 0x55, 0x9c, 0x30, 0x8f,
    0xb9, 0xa7, 0x26, 0x76, 0xa5, 0xae, 0xea, 0x94, 0x8f, 0xa5, 0xad, 0xec, 0x94, 0xa0, 0xde, 0x83,
]);

const INJECTION: &str = "pendoFixupHelpers.attemptedCodeInjection();";

fn agent_2_117_0_fixups() -> FixupSet {
    [
        // stop clearing real cookies
        (21400, "{document:{}}."),
        (170827, "pendoFixupHelpers.recursionDepth(),"),
        (133301, "pendoFixupHelpers.template();"),
        (218098, INJECTION),
        (79894, INJECTION),
        (429345, INJECTION),
        (19494, INJECTION),
        (1397, INJECTION),
        // keep SRI on even if the probe says otherwise
        (211752, "true||"),
        // route every request through pendo.ajax
        (25119, "false&&"),
        (25635, "return pendo.ajax.get(e).then(function(){},function(){});"),
        (31143, "false&&"),
        (31852, "false&&"),
        (31999, "true||"),
        (32206, "false&&"),
        (32441, "false&&"),
        (32562, "true||"),
        (219353, "return;"),
        (188619, "return n(pendoFixupHelpers.filteredAjax(t));"),
        // storage
        (162288, "return pendoFixupHelpers.localStorage;"),
        (162366, "return pendoFixupHelpers.sessionStorage;"),
        (73870, "pendoFixupHelpers."),
        (188179, ".pendoFixupHelpers"),
        (425057, "pendoFixupHelpers."),
        (425114, "pendoFixupHelpers."),
        (187269, "const localStorage=pendoFixupHelpers.localStorage;"),
        (385198, "if(!pendoFixupHelpers.filterGuideTag(e,t,n,i)){return false;}"),
        (171217, "pendoFixupHelpers.compress(e,r);"),
        // never load the staging build
        (1114, "return false;"),
        (225821, "pendoFixupHelpers.openXhrIntercept();"),
        (432605, "pendo.ConfigReader=ConfigReader;pendo.GuideLoader=GuideLoader;"),
        // cookies
        (186406, "return pendoFixupHelpers.cookieStorage.getItem(e);"),
        (186634, "return pendoFixupHelpers.cookieStorage.setItem(e,t);"),
        (21349, "return pendoFixupHelpers.cookieStorage.removeItem(e);"),
    ]
    .into_iter()
    .collect()
}

/// Every release the sandbox can load
#[must_use]
pub fn known_fixup_tables() -> FixupTables<HelperFactory> {
    FixupTables::new().with(
        AGENT_2_117_0_BODY,
        FixupEntry::new(agent_2_117_0_fixups(), make_fixup_helpers as HelperFactory),
    )
}
