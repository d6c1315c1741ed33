//! DOM 工具模块
//!
//! 基于 kuchikiki 的可变 DOM 封装：解析、序列化、深拷贝、
//! 子树搬移辅助和内容来源标记管理。
//!
//! 文本语义说明：元素的 text 是它开头的文本子节点，tail 是
//! 它与下一个元素兄弟之间的文本节点串。规则搬移子树时必须让
//! 这些文本留在原位或跟着走，下面的辅助函数封装了这条纪律。

use kuchikiki::traits::*;
use kuchikiki::{parse_html, Attribute, NodeData, NodeRef};
use markup5ever::{namespace_url, ns, LocalName, QualName};

/// 内容来源标记属性：凡是从内容文档搬进主题的元素都带上它，
/// 主题侧选择器会跳过带标记的子树，序列化前必须全部清除。
pub const CONTENT_MARKER: &str = "x-reskin-content-marker";

/// 把 HTML 字符串解析为文档树
pub fn parse_document(html: &str) -> NodeRef {
    parse_html().one(html)
}

/// 序列化节点（文档节点序列化其全部子节点）
pub fn serialize(node: &NodeRef) -> String {
    let mut buf = Vec::new();
    if node.serialize(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// 是否为文本节点
pub fn is_text(node: &NodeRef) -> bool {
    node.as_text().is_some()
}

/// 取元素的本地标签名
pub fn element_name(node: &NodeRef) -> Option<String> {
    node.as_element().map(|el| el.name.local.to_string())
}

/// 读取元素属性
pub fn get_attribute(node: &NodeRef, name: &str) -> Option<String> {
    let el = node.as_element()?;
    let attrs = el.attributes.borrow();
    attrs.get(name).map(|v| v.to_string())
}

/// 设置元素属性
pub fn set_attribute(node: &NodeRef, name: &str, value: impl Into<String>) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().insert(name, value.into());
    }
}

/// 删除元素属性
pub fn remove_attribute(node: &NodeRef, name: &str) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().remove(name);
    }
}

/// 新建一个 HTML 命名空间下的元素
pub fn new_element(
    tag: &str,
    attributes: impl IntoIterator<Item = (kuchikiki::ExpandedName, Attribute)>,
) -> NodeRef {
    NodeRef::new_element(
        QualName::new(None, ns!(html), LocalName::from(tag)),
        attributes,
    )
}

/// 深拷贝一个子树
///
/// 拷贝不带 tail：调用方拿到的是一棵独立的树，原树不动。
pub fn deep_clone(node: &NodeRef) -> NodeRef {
    let copy = match node.data() {
        NodeData::Element(el) => NodeRef::new_element(
            el.name.clone(),
            el.attributes
                .borrow()
                .map
                .iter()
                .map(|(name, attr)| (name.clone(), attr.clone())),
        ),
        NodeData::Text(text) => NodeRef::new_text(text.borrow().clone()),
        NodeData::Comment(comment) => NodeRef::new_comment(comment.borrow().clone()),
        NodeData::ProcessingInstruction(pi) => {
            let (target, data) = pi.borrow().clone();
            NodeRef::new_processing_instruction(target, data)
        }
        // 文档级节点不会出现在被拷贝的内容片段里
        _ => NodeRef::new_text(String::new()),
    };
    for child in node.children() {
        copy.append(deep_clone(&child));
    }
    copy
}

/// 元素是否有内容（任一元素子节点，或非空文本）
pub fn element_has_content(node: &NodeRef) -> bool {
    node.children().any(|child| {
        if let Some(text) = child.as_text() {
            !text.borrow().is_empty()
        } else {
            child.as_element().is_some()
        }
    })
}

/// 取元素的全部子节点（含文本节点），即它的"逻辑孩子"
pub fn logical_children(node: &NodeRef) -> Vec<NodeRef> {
    node.children().collect()
}

/// 清空元素的全部子节点和文本
pub fn clear_children(node: &NodeRef) {
    while let Some(child) = node.first_child() {
        child.detach();
    }
}

/// 摘下元素的 tail（它后面连续的文本节点），按原顺序返回
pub fn detach_tail(node: &NodeRef) -> Vec<NodeRef> {
    let mut tail = Vec::new();
    let mut next = node.next_sibling();
    while let Some(sibling) = next {
        if !is_text(&sibling) {
            break;
        }
        next = sibling.next_sibling();
        sibling.detach();
        tail.push(sibling);
    }
    tail
}

/// 把一组节点依次插到 anchor 前面，保持顺序
pub fn insert_all_before(anchor: &NodeRef, nodes: &[NodeRef]) {
    for node in nodes {
        node.detach();
        anchor.insert_before(node.clone());
    }
}

/// 把一组节点追加为 parent 的最后一批孩子
pub fn append_all(parent: &NodeRef, nodes: &[NodeRef]) {
    for node in nodes {
        node.detach();
        parent.append(node.clone());
    }
}

/// 把一组节点插到元素现有孩子（含开头文本）之前
pub fn prepend_all(parent: &NodeRef, nodes: &[NodeRef]) {
    match parent.first_child() {
        Some(first) => insert_all_before(&first, nodes),
        None => append_all(parent, nodes),
    }
}

/// 把一组节点插到元素的 tail 之后
///
/// 也就是"排在该元素及其随行文本后面"：下一个非文本兄弟之前，
/// 没有就追加到父节点末尾。
pub fn insert_after_tail(node: &NodeRef, nodes: &[NodeRef]) {
    let mut boundary = node.next_sibling();
    while let Some(sibling) = boundary.clone() {
        if !is_text(&sibling) {
            break;
        }
        boundary = sibling.next_sibling();
    }
    match (boundary, node.parent()) {
        (Some(next), _) => insert_all_before(&next, nodes),
        (None, Some(parent)) => append_all(&parent, nodes),
        (None, None) => {}
    }
}

/// 给一组内容元素打上来源标记
pub fn mark_content_elements(nodes: &[NodeRef]) {
    for node in nodes {
        set_attribute(node, CONTENT_MARKER, "1");
    }
}

/// 判断节点是否源于内容文档（检查自身与全部祖先）
pub fn is_content_element(node: &NodeRef) -> bool {
    node.inclusive_ancestors().any(|ancestor| {
        ancestor
            .as_element()
            .map_or(false, |el| el.attributes.borrow().contains(CONTENT_MARKER))
    })
}

/// 清除整棵树上的来源标记
pub fn strip_content_markers(doc: &NodeRef) {
    for node in doc.inclusive_descendants() {
        if let Some(el) = node.as_element() {
            el.attributes.borrow_mut().remove(CONTENT_MARKER);
        }
    }
}
